//! Per-request cloud selection from headers
//!
//! | Header                | Content                                         |
//! |-----------------------|-------------------------------------------------|
//! | `X-Cloud-Provider`    | `aws`, `gcp`, `az` or `k8s`                     |
//! | `X-Cloud-Region`      | optional, generic or provider-native region     |
//! | `X-Cloud-Credentials` | base64 of a JSON object of provider variables   |

use crate::error::{ApiError, ApiResult};
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;
use taskfleet_cloud::{Cloud, Provider, Region};
use taskfleet_config::Settings;

pub const PROVIDER_HEADER: &str = "x-cloud-provider";
pub const REGION_HEADER: &str = "x-cloud-region";
pub const CREDENTIALS_HEADER: &str = "x-cloud-credentials";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| ApiError::Unauthorized(format!("{name} is not valid text")))
        })
        .transpose()
}

/// Cloud described by the request headers, on top of the daemon settings
pub fn cloud_from_headers(headers: &HeaderMap, settings: &Settings) -> ApiResult<Cloud> {
    let provider: Provider = header(headers, PROVIDER_HEADER)?
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {PROVIDER_HEADER} header")))?
        .parse()
        .map_err(|err| ApiError::Unauthorized(format!("{err}")))?;

    let encoded = header(headers, CREDENTIALS_HEADER)?
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {CREDENTIALS_HEADER} header")))?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|err| ApiError::Unauthorized(format!("credentials are not base64: {err}")))?;
    let credentials: BTreeMap<String, String> = serde_json::from_slice(&decoded)
        .map_err(|err| ApiError::Unauthorized(format!("credentials are not a JSON object: {err}")))?;

    let mut cloud = settings.cloud(provider).with_credentials(credentials);
    if let Some(region) = header(headers, REGION_HEADER)?.filter(|region| !region.is_empty()) {
        cloud = cloud.with_region(Region::new(region));
    }
    cloud
        .validate_credentials()
        .map_err(|err| ApiError::Unauthorized(err.to_string()))?;
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(provider: &str, credentials: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(PROVIDER_HEADER, HeaderValue::from_str(provider).unwrap());
        headers.insert(
            CREDENTIALS_HEADER,
            HeaderValue::from_str(&STANDARD.encode(credentials)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_complete_credentials() {
        let mut headers = headers("k8s", r#"{"KUBECONFIG_DATA": "apiVersion: v1"}"#);
        headers.insert(REGION_HEADER, HeaderValue::from_static("eu-west"));

        let cloud = cloud_from_headers(&headers, &Settings::default()).unwrap();

        assert_eq!(cloud.provider, Provider::K8s);
        assert_eq!(cloud.region.as_str(), "eu-west");
        assert_eq!(cloud.credentials["KUBECONFIG_DATA"], "apiVersion: v1");
    }

    #[test]
    fn test_region_defaults_to_settings() {
        let headers = headers("k8s", r#"{"KUBECONFIG_DATA": "x"}"#);
        let settings = Settings {
            region: Region::new("us-east"),
            ..Settings::default()
        };

        let cloud = cloud_from_headers(&headers, &settings).unwrap();

        assert_eq!(cloud.region.as_str(), "us-east");
    }

    #[test]
    fn test_rejections() {
        let settings = Settings::default();
        let unauthorized = |headers: HeaderMap| {
            matches!(
                cloud_from_headers(&headers, &settings),
                Err(ApiError::Unauthorized(_))
            )
        };

        assert!(unauthorized(HeaderMap::new()));
        assert!(unauthorized(headers("openstack", "{}")));
        assert!(unauthorized(headers("aws", r#"{"AWS_ACCESS_KEY_ID": "a"}"#)));
        assert!(unauthorized(headers("gcp", "not json")));

        let mut garbled = headers("az", "{}");
        garbled.insert(CREDENTIALS_HEADER, HeaderValue::from_static("%%%"));
        assert!(unauthorized(garbled));
    }
}
