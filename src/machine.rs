use std::fmt;

/// Command port agents listen on when a machine id carries none.
pub const DEFAULT_COMMAND_PORT: u16 = 8719;

/// Resolved `host@port` form of an opaque machine identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MachineAddress {
    pub host: String,
    pub command_port: u16,
}

impl MachineAddress {
    pub fn new(host: impl Into<String>, command_port: u16) -> Self {
        Self {
            host: host.into(),
            command_port,
        }
    }

    /// Tag used in failure sets and logs.
    pub fn tag(&self) -> String {
        format!("{}@{}", self.host, self.command_port)
    }
}

impl fmt::Display for MachineAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.host, self.command_port)
    }
}

/// Splits `machine_id` on its last `@`.
///
/// Returns `None` for anything that is not `host@port` with a non-empty host and a
/// positive port; callers skip such ids rather than failing the batch.
pub fn parse_machine_id(machine_id: &str) -> Option<MachineAddress> {
    let (host, port) = machine_id.rsplit_once('@')?;
    if host.trim().is_empty() {
        return None;
    }
    let port = parse_port(port)?;
    Some(MachineAddress::new(host, port))
}

/// Port part of `machine_id`, or `default` when the id does not parse.
pub fn parse_command_port(machine_id: &str, default: u16) -> u16 {
    machine_id
        .rsplit_once('@')
        .and_then(|(_, port)| parse_port(port))
        .unwrap_or(default)
}

fn parse_port(raw: &str) -> Option<u16> {
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            parse_machine_id("10.0.0.1@8080"),
            Some(MachineAddress::new("10.0.0.1", 8080))
        );
    }

    #[test]
    fn splits_on_last_at_sign() {
        let addr = parse_machine_id("node@rack-1@8719").unwrap();
        assert_eq!(addr.host, "node@rack-1");
        assert_eq!(addr.command_port, 8719);
        assert_eq!(addr.tag(), "node@rack-1@8719");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!(parse_machine_id("bad-id"), None);
        assert_eq!(parse_machine_id(""), None);
        assert_eq!(parse_machine_id("@8719"), None);
        assert_eq!(parse_machine_id("10.0.0.1@"), None);
        assert_eq!(parse_machine_id("10.0.0.1@0"), None);
        assert_eq!(parse_machine_id("10.0.0.1@-1"), None);
        assert_eq!(parse_machine_id("10.0.0.1@70000"), None);
        assert_eq!(parse_machine_id("10.0.0.1@http"), None);
    }

    #[test]
    fn command_port_falls_back_to_default() {
        assert_eq!(parse_command_port("10.0.0.1@8720", DEFAULT_COMMAND_PORT), 8720);
        assert_eq!(parse_command_port("10.0.0.1", DEFAULT_COMMAND_PORT), 8719);
        assert_eq!(parse_command_port("10.0.0.1@x", 9000), 9000);
    }
}
