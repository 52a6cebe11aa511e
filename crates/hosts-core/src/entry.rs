use std::net::IpAddr;

use crate::{HostsError, HostsResult, section::is_valid_hostname};

/// Parse a command-line hosts mapping.
///
/// Format: `address=name[,name...]`. IPv6 addresses may be bracketed; empty
/// names between commas are skipped.
pub fn parse_host_entry(entry: &str) -> HostsResult<(String, Vec<String>)> {
    let (address, names) = entry
        .split_once('=')
        .ok_or_else(|| HostsError::InvalidEntry(entry.to_string()))?;

    let address = address.trim();
    let address = address
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(address);
    if address.parse::<IpAddr>().is_err() {
        return Err(HostsError::InvalidAddress(address.to_string()));
    }

    let names: Vec<String> = names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(HostsError::InvalidEntry(entry.to_string()));
    }
    if let Some(bad) = names.iter().find(|name| !is_valid_hostname(name)) {
        return Err(HostsError::InvalidHostname(bad.clone()));
    }
    Ok((address.to_string(), names))
}
