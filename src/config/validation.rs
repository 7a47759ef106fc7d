//! Configuration validation.

use crate::config::proxy::ProxySetting;
use crate::config::{Config, header_map};
use crate::dialer::{Scheme, TunnelEndpoint};
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one client or server
/// - Unique, non-empty names across clients and servers
/// - No duplicate listen addresses
/// - Tunnel URLs with a ws, wss, http or https scheme
/// - Explicit proxy URLs with an http or https scheme
/// - Valid extra header names and values
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.clients.is_empty() && config.servers.is_empty() {
        errors.push("at least one client or server must be defined".to_string());
    }

    let mut names = HashSet::new();
    let mut listen_addresses = HashSet::new();
    let listeners = config
        .clients
        .iter()
        .map(|c| (&c.name, c.listen))
        .chain(config.servers.iter().map(|s| (&s.name, s.listen)));

    for (name, listen) in listeners {
        if name.is_empty() {
            errors.push("listener name cannot be empty".to_string());
        } else if !names.insert(name) {
            errors.push(format!("duplicate listener name: {}", name));
        }

        // Port 0 binds an ephemeral port, so it can repeat.
        if listen.port() != 0 && !listen_addresses.insert(listen) {
            errors.push(format!(
                "duplicate listen address: {} (listener: {})",
                listen, name
            ));
        }
    }

    for client in &config.clients {
        match TunnelEndpoint::parse(&client.tunnel) {
            Ok(endpoint) if endpoint.known_scheme().is_none() => errors.push(format!(
                "client '{}' tunnel has unsupported scheme '{}'",
                client.name,
                endpoint.scheme()
            )),
            Ok(_) => {}
            Err(e) => errors.push(format!("client '{}' tunnel: {}", client.name, e)),
        }

        if let ProxySetting::Url(url) = client.proxy_setting() {
            match TunnelEndpoint::parse(&url) {
                Ok(proxy) => match proxy.known_scheme() {
                    Some(Scheme::Http | Scheme::Https) => {}
                    _ => errors.push(format!(
                        "client '{}' proxy must be http or https, got '{}'",
                        client.name,
                        proxy.scheme()
                    )),
                },
                Err(e) => errors.push(format!("client '{}' proxy: {}", client.name, e)),
            }
        }

        if let Err(e) = header_map(&client.headers) {
            errors.push(format!("client '{}': {}", client.name, e));
        }

        if let Some(name) = &client.tls.server_name {
            if name.is_empty() {
                errors.push(format!("client '{}' tls server_name is empty", client.name));
            }
        }
    }

    for server in &config.servers {
        if let Some(tls) = &server.tls {
            if tls.cert.as_os_str().is_empty() || tls.key.as_os_str().is_empty() {
                errors.push(format!(
                    "server '{}' tls requires both cert and key",
                    server.name
                ));
            }
        }
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use std::path::PathBuf;

    fn client(name: &str, listen: &str, tunnel: &str) -> ClientConfig {
        serde_yaml::from_str(&format!(
            "name: {name}\nlisten: \"{listen}\"\ntunnel: \"{tunnel}\"\n"
        ))
        .unwrap()
    }

    fn server(name: &str, listen: &str) -> ServerConfig {
        serde_yaml::from_str(&format!("name: {name}\nlisten: \"{listen}\"\n")).unwrap()
    }

    fn minimal_config() -> Config {
        Config {
            global: GlobalConfig::default(),
            clients: vec![client("ssh", "127.0.0.1:2222", "ws://bridge.local/10.0.0.5:22")],
            servers: vec![server("edge", "0.0.0.0:8080")],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&minimal_config()).is_ok());
    }

    #[test]
    fn test_empty_config() {
        let result = validate_config(&Config::default());
        assert!(result.unwrap_err().contains("at least one client or server"));
    }

    #[test]
    fn test_duplicate_names_across_roles() {
        let mut config = minimal_config();
        config.servers[0].name = "ssh".to_string();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("duplicate listener name: ssh"));
    }

    #[test]
    fn test_duplicate_listen_address() {
        let mut config = minimal_config();
        config
            .clients
            .push(client("db", "127.0.0.1:2222", "ws://bridge.local/db:5432"));
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("duplicate listen address"));
    }

    #[test]
    fn test_unsupported_tunnel_scheme() {
        let mut config = minimal_config();
        config.clients[0].tunnel = "ftp://files.example.com/x".to_string();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("unsupported scheme 'ftp'"));
    }

    #[test]
    fn test_proxy_must_be_http() {
        let mut config = minimal_config();
        config.clients[0].proxy = "ws://proxy.local:8080".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("proxy must be http or https"));

        config.clients[0].proxy = "noProxy".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_header() {
        let mut config = minimal_config();
        config.clients[0]
            .headers
            .insert("X-Ok".to_string(), "bad\nvalue".to_string());
        assert!(validate_config(&config).unwrap_err().contains("invalid header"));
    }

    #[test]
    fn test_server_tls_requires_both_files() {
        let mut config = minimal_config();
        config.servers[0].tls = Some(ServerTlsConfig {
            cert: PathBuf::from("cert.pem"),
            key: PathBuf::new(),
        });
        assert!(validate_config(&config).unwrap_err().contains("cert and key"));
    }

    #[test]
    fn test_errors_are_joined() {
        let mut config = minimal_config();
        config.clients[0].tunnel = "not a url".to_string();
        config.global.log_level = "loud".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("; "));
        assert!(err.contains("invalid log level 'loud'"));
    }
}
