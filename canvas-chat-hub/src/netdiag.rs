//! One-shot host networking queries.
//!
//! Every function renders its outcome, failures included, into a string for
//! display. None of them touch hub state.

use std::net::IpAddr;

use tokio::{net::lookup_host, process::Command};

pub async fn list_network_interfaces() -> String {
    match run_tool("ip", &["addr", "show"]).await {
        Ok(output) => output,
        Err(_) => run_tool("ifconfig", &[])
            .await
            .unwrap_or_else(|err| format!("interface listing failed: {err}")),
    }
}

/// Shows `value` converted to network byte order and back.
pub fn demonstrate_byte_order_round_trip(value: u32) -> String {
    let network = value.to_be();
    let host = u32::from_be(network);
    format!(
        "original: {value} (0x{value:08x})\n\
         network byte order: {network} (0x{network:08x})\n\
         host byte order: {host} (0x{host:08x})"
    )
}

/// Packs an IP literal into its octets and formats it again.
pub fn round_trip_ip_literal(literal: &str) -> String {
    match literal.trim().parse::<IpAddr>() {
        Ok(ip) => {
            let packed = match ip {
                IpAddr::V4(v4) => v4.octets().to_vec(),
                IpAddr::V6(v6) => v6.octets().to_vec(),
            };
            let unpacked = match ip {
                IpAddr::V4(_) => <[u8; 4]>::try_from(packed.as_slice()).map(IpAddr::from),
                IpAddr::V6(_) => <[u8; 16]>::try_from(packed.as_slice()).map(IpAddr::from),
            };
            match unpacked {
                Ok(unpacked) => format!("input: {literal}, packed: {packed:02x?}, unpacked: {unpacked}"),
                Err(err) => format!("IP conversion error: {err}"),
            }
        }
        Err(err) => format!("IP conversion error: {err}"),
    }
}

/// Resolves `domain` and reverse-resolves the first address found.
pub async fn resolve_and_reverse_resolve(domain: &str) -> String {
    let addrs = match lookup_host((domain, 0)).await {
        Ok(addrs) => addrs.collect::<Vec<_>>(),
        Err(err) => return format!("DNS lookup error: {err}"),
    };
    let Some(ip) = addrs
        .iter()
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
        .or_else(|| addrs.first().map(|addr| addr.ip()))
    else {
        return format!("DNS lookup error: no addresses for {domain}");
    };

    let ip_text = ip.to_string();
    let reverse = match run_tool("getent", &["hosts", &ip_text]).await {
        Ok(output) => output
            .split_whitespace()
            .nth(1)
            .map(str::to_string)
            .unwrap_or_else(|| "(no PTR record)".to_string()),
        Err(err) => format!("(reverse lookup failed: {err})"),
    };

    format!("domain: {domain}, IP: {ip}, reverse DNS: {reverse}")
}

/// Lists TCP sockets, keeping only lines that mention `port` when given.
pub async fn list_connections_for_port(port: Option<u16>) -> String {
    let output = match run_tool("netstat", &["-a", "-n", "-t"]).await {
        Ok(output) => output,
        Err(err) => return format!("connection listing failed: {err}"),
    };

    let Some(port) = port else {
        return output;
    };

    let needles = [format!(":{port}"), format!(".{port}")];
    let matching: Vec<&str> = output
        .lines()
        .filter(|line| line_mentions_port(line, &needles))
        .collect();

    if matching.is_empty() {
        format!("no connections on port {port}")
    } else {
        matching.join("\n")
    }
}

fn line_mentions_port(line: &str, needles: &[String]) -> bool {
    line.split_whitespace().any(|column| {
        needles
            .iter()
            .any(|needle| column.ends_with(needle.as_str()))
    })
}

async fn run_tool(program: &str, args: &[&str]) -> Result<String, String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|err| format!("{program}: {err}"))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.status.success() {
        Ok(text)
    } else {
        Err(format!("{program} exited with {}: {}", output.status, text.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_order_round_trip_restores_the_value() {
        let report = demonstrate_byte_order_round_trip(0x1234_5678);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "original: 305419896 (0x12345678)");
        assert!(lines[1].starts_with("network byte order: "));
        assert_eq!(lines[2], "host byte order: 305419896 (0x12345678)");
    }

    #[test]
    fn ip_literals_round_trip() {
        assert_eq!(
            round_trip_ip_literal("192.168.0.1"),
            "input: 192.168.0.1, packed: [c0, a8, 00, 01], unpacked: 192.168.0.1"
        );
        assert!(round_trip_ip_literal("::1").ends_with("unpacked: ::1"));
    }

    #[test]
    fn malformed_ip_literal_is_reported_not_raised() {
        assert!(round_trip_ip_literal("300.1.2.3").starts_with("IP conversion error"));
        assert!(round_trip_ip_literal("not an ip").starts_with("IP conversion error"));
    }

    #[test]
    fn port_filter_matches_address_columns() {
        let needles = [":5000".to_string(), ".5000".to_string()];
        assert!(line_mentions_port(
            "tcp  0  0 127.0.0.1:5000  0.0.0.0:*  LISTEN",
            &needles
        ));
        assert!(line_mentions_port("tcp4 0 0 127.0.0.1.5000 *.* LISTEN", &needles));
        assert!(!line_mentions_port(
            "tcp  0  0 127.0.0.1:50001  0.0.0.0:*  LISTEN",
            &needles
        ));
    }

    #[tokio::test]
    async fn missing_tool_is_a_diagnostic() {
        let err = run_tool("definitely-not-an-installed-tool", &[])
            .await
            .expect_err("tool should be missing");
        assert!(err.starts_with("definitely-not-an-installed-tool:"));
    }
}
