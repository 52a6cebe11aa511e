use dt_types::ssh::PortForward;

use crate::SshCoreError;

/// Parse a remote forward specification.
///
/// Format: `[bind_address:]port:host:hostport`. The server listens on
/// `bind_address:port`; connections are dialed to `host:hostport` locally.
pub fn parse_remote_forward(spec: &str) -> crate::SshResult<PortForward> {
    let (bind, port, host, hostport) = split_forward(spec, "remote")?;
    Ok(PortForward {
        local_addr: host,
        local_port: hostport,
        remote_addr: bind,
        remote_port: port,
    }
    .with_defaults())
}

/// Parse a local forward specification.
///
/// Format: `[bind_address:]port:host:hostport`. We listen on
/// `bind_address:port`; connections are opened to `host:hostport` through the
/// SSH server.
pub fn parse_local_forward(spec: &str) -> crate::SshResult<PortForward> {
    let (bind, port, host, hostport) = split_forward(spec, "local")?;
    Ok(PortForward {
        local_addr: bind,
        local_port: port,
        remote_addr: host,
        remote_port: hostport,
    }
    .with_defaults())
}

// Helper functions

/// `(bind, port, host, hostport)` with unset hosts left empty.
fn split_forward(spec: &str, kind: &str) -> crate::SshResult<(String, u16, String, u16)> {
    let fields = split_colon_parts(spec);
    match fields.as_slice() {
        [bind, port, host, hostport] => Ok((
            normalize_host(bind).unwrap_or_default(),
            parse_port(port)?,
            normalize_host(host).unwrap_or_default(),
            parse_port(hostport)?,
        )),
        [port, host, hostport] => Ok((
            String::new(),
            parse_port(port)?,
            normalize_host(host).unwrap_or_default(),
            parse_port(hostport)?,
        )),
        _ => Err(SshCoreError::invalid_forward(kind, "spec must be [bind_address:]port:host:hostport")),
    }
}

fn parse_port(value: &str) -> crate::SshResult<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| SshCoreError::InvalidPort(value.to_string()))
}

fn normalize_host(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let no_brackets = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(|inner| inner.to_string());
    no_brackets.or_else(|| Some(trimmed.to_string()))
}

fn split_colon_parts(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0;
    for ch in input.chars() {
        match ch {
            ':' if bracket_depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                if bracket_depth > 0 {
                    bracket_depth -= 1;
                }
                current.push(ch);
            }
            _ => current.push(ch),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

#[cfg(test)]
#[path = "parsing_tests.rs"]
mod tests;
