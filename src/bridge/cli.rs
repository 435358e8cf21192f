//! Admin CLI command rendering

use super::script::MANAGEMENT_APPLICATION;
use std::net::SocketAddr;

/// `connect` prefix targeting the REST admin endpoint
pub fn connect(endpoint: SocketAddr, context_path: &str) -> String {
    format!("connect {}{};", endpoint, context_path)
}

fn use_management() -> String {
    format!("use-application --verbose {};", MANAGEMENT_APPLICATION)
}

/// Install a service recipe into the management application
pub fn install_service(name: &str, zone: &str, recipe_dir: &str) -> String {
    format!(
        "{}install-service --verbose -name {} -zone {} {}",
        use_management(),
        name,
        zone,
        recipe_dir
    )
}

/// Uninstall a service from the management application
pub fn uninstall_service(name: &str) -> String {
    format!("{}uninstall-service --verbose {}", use_management(), name)
}

/// Invoke a custom command on every instance of a service
pub fn invoke(service: &str, command: &str, parameters: &[(String, String)]) -> String {
    let mut text = format!("{}invoke --verbose {} {} [ ", use_management(), service, command);
    for (key, value) in parameters {
        text.push_str(&format!("'{}={}' ", key, value));
    }
    text.push(']');
    text
}
