//! System descriptor tool.

use serde_json::{json, Value};

use super::ToolError;

/// Describe the host platform.
pub(super) async fn get_system_info() -> Result<Value, ToolError> {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    Ok(json!({
        "platform": std::env::consts::OS,
        "os_family": std::env::consts::FAMILY,
        "architecture": std::env::consts::ARCH,
        "hostname": hostname,
        "cpu_count": cpu_count,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_descriptor_fields() {
        let info = get_system_info().await.unwrap();
        assert_eq!(info["platform"], std::env::consts::OS);
        assert_eq!(info["architecture"], std::env::consts::ARCH);
        assert!(info["cpu_count"].as_u64().unwrap() >= 1);
        assert!(!info["hostname"].as_str().unwrap().is_empty());
    }
}
