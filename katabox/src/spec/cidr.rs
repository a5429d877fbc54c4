//! CIDR block validation for egress whitelists.

use std::net::IpAddr;

use crate::errors::{KataboxError, KataboxResult};

/// Validate a CIDR block (`"1.1.1.1/32"`, `"10.0.0.0/8"`, `"fd00::/8"`).
///
/// A bare address without a prefix length is rejected; whitelist entries
/// must be explicit about their breadth.
pub fn validate_cidr(cidr: &str) -> KataboxResult<()> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| invalid(cidr, "missing '/prefix'"))?;

    let addr: IpAddr = addr
        .parse()
        .map_err(|_| invalid(cidr, "bad address"))?;

    let prefix: u8 = prefix
        .parse()
        .map_err(|_| invalid(cidr, "bad prefix length"))?;

    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix > max {
        return Err(invalid(cidr, "prefix length out of range"));
    }

    Ok(())
}

fn invalid(cidr: &str, why: &str) -> KataboxError {
    KataboxError::Validation(format!("invalid CIDR '{}': {}", cidr, why))
}
