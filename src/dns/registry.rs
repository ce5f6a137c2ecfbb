//! nameserver and hosts file discovery through the Windows registry

use std::collections::HashSet;
use std::net::IpAddr;

use crate::dns::config::ConfigError;

#[cfg(windows)]
const TCPIP_PARAMETERS: &str = r"SYSTEM\CurrentControlSet\Services\Tcpip\Parameters";

/// Reads the global `NameServer` value followed by every per-interface
/// override. Addresses are de-duplicated, keeping the first occurrence.
#[cfg(windows)]
pub fn nameservers() -> Result<(Vec<IpAddr>, Vec<ConfigError>), ConfigError> {
    use winreg::enums::HKEY_LOCAL_MACHINE;
    use winreg::RegKey;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let params = hklm
        .open_subkey(TCPIP_PARAMETERS)
        .map_err(|e| ConfigError::Registry(e.to_string()))?;

    let mut values = Vec::new();
    if let Ok(global) = params.get_value::<String, _>("NameServer") {
        values.push(global);
    }

    if let Ok(interfaces) = params.open_subkey("Interfaces") {
        for name in interfaces.enum_keys().filter_map(|x| x.ok()) {
            let interface = match interfaces.open_subkey(&name) {
                Ok(x) => x,
                Err(_) => continue,
            };
            if let Ok(value) = interface.get_value::<String, _>("NameServer") {
                values.push(value);
            }
        }
    }

    Ok(split_nameservers(&values))
}

/// Location of the hosts file, below the expanded `DataBasePath`.
#[cfg(windows)]
pub fn hosts_path() -> Result<std::path::PathBuf, ConfigError> {
    use winreg::enums::HKEY_LOCAL_MACHINE;
    use winreg::RegKey;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let base_path = hklm
        .open_subkey(TCPIP_PARAMETERS)
        .and_then(|params| params.get_value::<String, _>("DataBasePath"))
        .map_err(|e| ConfigError::Registry(e.to_string()))?;

    let expanded = expand_environment(&base_path, |name| std::env::var(name).ok());

    Ok(std::path::Path::new(&expanded).join("hosts"))
}

/// Splits registry `NameServer` values, which separate addresses with commas
/// or spaces, into unique addresses.
pub fn split_nameservers(values: &[String]) -> (Vec<IpAddr>, Vec<ConfigError>) {
    let mut seen = HashSet::new();
    let mut servers = Vec::new();
    let mut errors = Vec::new();

    let tokens = values
        .iter()
        .flat_map(|value| value.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|token| !token.is_empty());

    for (idx, token) in tokens.enumerate() {
        match token.parse::<IpAddr>() {
            Ok(addr) => {
                if seen.insert(addr) {
                    servers.push(addr);
                }
            }
            Err(source) => errors.push(ConfigError::InvalidAddress {
                line: idx + 1,
                value: token.to_string(),
                source,
            }),
        }
    }

    (servers, errors)
}

/// Replaces `%NAME%` references with values from `lookup`. Unknown
/// references are left untouched.
pub fn expand_environment<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find('%') {
        result.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match after.find('%') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(expanded) if !name.is_empty() => result.push_str(&expanded),
                    _ => {
                        result.push('%');
                        result.push_str(name);
                        result.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_split_nameservers() {
        let values = vec![
            "10.0.0.1,10.0.0.2".to_string(),
            "".to_string(),
            "10.0.0.2 fe80::1 garbage".to_string(),
            "10.0.0.1".to_string(),
        ];
        let (servers, errors) = split_nameservers(&values);

        assert_eq!(
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "10.0.0.2".parse::<IpAddr>().unwrap(),
                "fe80::1".parse::<IpAddr>().unwrap()
            ],
            servers
        );
        assert_eq!(1, errors.len());
    }

    #[test]
    fn test_expand_environment() {
        let lookup = |name: &str| match name {
            "SystemRoot" => Some(r"C:\Windows".to_string()),
            _ => None,
        };

        assert_eq!(
            r"C:\Windows\System32\drivers\etc",
            expand_environment(r"%SystemRoot%\System32\drivers\etc", lookup)
        );
        assert_eq!(r"%Missing%\etc", expand_environment(r"%Missing%\etc", lookup));
        assert_eq!("100%", expand_environment("100%", lookup));
        assert_eq!("plain", expand_environment("plain", lookup));
    }
}
