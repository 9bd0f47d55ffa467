//! Worker startup script
//!
//! VM providers boot workers with a script that installs the user script, its
//! environment and the taskfleet agent, which runs the script and writes
//! reports under `<remote>/reports`.

use crate::cloud::Cloud;
use crate::identifier::Identifier;
use crate::model::Environment;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;

const AGENT_SETUP: &str = r#"#!/bin/bash
set -e

mkdir -p /opt/taskfleet
echo "{{SCRIPT}}" | base64 -d > /opt/taskfleet/script
chmod +x /opt/taskfleet/script
echo "{{ENVIRONMENT}}" | base64 -d > /opt/taskfleet/environment
chmod 600 /opt/taskfleet/environment

if ! command -v taskfleet-agent &> /dev/null; then
    curl -fsSL https://github.com/chronista-club/taskfleet/releases/latest/download/taskfleet-agent-linux-amd64 \
        -o /usr/local/bin/taskfleet-agent
    chmod +x /usr/local/bin/taskfleet-agent
fi

cat > /etc/systemd/system/taskfleet-agent.service <<'END'
[Unit]
Description=taskfleet agent
After=network-online.target

[Service]
Type=simple
EnvironmentFile=/opt/taskfleet/environment
ExecStart=/usr/local/bin/taskfleet-agent --script /opt/taskfleet/script --timeout {{TIMEOUT}}
ExecStopPost=/usr/local/bin/taskfleet-agent --report-exit
RuntimeMaxSec={{TIMEOUT}}
Restart=no

[Install]
WantedBy=multi-user.target
END

systemctl daemon-reload
systemctl enable --now taskfleet-agent.service
"#;

/// Variables every worker receives alongside the storage credentials
pub fn task_variables(cloud: &Cloud, identifier: &Identifier, remote: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("TASKFLEET_REMOTE".to_string(), remote.to_string()),
        ("TASKFLEET_CLOUD_PROVIDER".to_string(), cloud.provider.to_string()),
        ("TASKFLEET_CLOUD_REGION".to_string(), cloud.native_region()),
        ("TASKFLEET_IDENTIFIER".to_string(), identifier.long()),
    ])
}

/// Render the boot script for one worker
///
/// `credentials` wins over user variables of the same name.
pub fn startup_script(environment: &Environment, credentials: &BTreeMap<String, String>) -> String {
    let mut variables = environment.resolved_variables();
    variables.extend(credentials.iter().map(|(k, v)| (k.clone(), v.clone())));

    let env_file: String = variables
        .iter()
        .map(|(name, value)| format!("{name}={}\n", quote(value)))
        .collect();

    AGENT_SETUP
        .replace("{{SCRIPT}}", &STANDARD.encode(&environment.script))
        .replace("{{ENVIRONMENT}}", &STANDARD.encode(env_file))
        .replace("{{TIMEOUT}}", &environment.timeout.as_secs().to_string())
}

/// systemd EnvironmentFile quoting
fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}
