//! Argument parsers and lookups shared across CLI commands.

use segdl::checksum::DigestAlgorithm;
use segdl::model::{Priority, RequestHeaders, Transfer};
use segdl::storage::TransferStore;

use crate::error::CliError;

/// Expected digest given as `ALGORITHM:HEX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: DigestAlgorithm,
    pub hex: String,
}

/// `high`, `normal`, `low` or a signed integer.
pub fn parse_priority(s: &str) -> Result<Priority, String> {
    match s.to_ascii_lowercase().as_str() {
        "high" => Ok(Priority::HIGH),
        "normal" => Ok(Priority::NORMAL),
        "low" => Ok(Priority::LOW),
        other => other
            .parse::<i32>()
            .map(Priority)
            .map_err(|_| format!("invalid priority '{}': use high, normal, low or a number", s)),
    }
}

pub fn parse_checksum(s: &str) -> Result<Checksum, String> {
    let (algorithm, hex) = s
        .split_once(':')
        .ok_or_else(|| format!("expected ALGORITHM:HEX, got '{}'", s))?;
    let algorithm: DigestAlgorithm = algorithm.parse()?;
    let hex = hex.trim().to_ascii_lowercase();

    if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "{} digests are {} hex characters",
            algorithm,
            algorithm.hex_len()
        ));
    }
    Ok(Checksum { algorithm, hex })
}

/// `Name: Value`
pub fn parse_header(s: &str) -> Result<(String, String), String> {
    RequestHeaders::parse_line(s).ok_or_else(|| format!("expected 'Name: Value', got '{}'", s))
}

/// Finds the stored transfer whose id equals or uniquely starts with `prefix`.
pub fn find_transfer(store: &dyn TransferStore, prefix: &str) -> Result<Transfer, CliError> {
    let mut matches: Vec<Transfer> = store
        .list()?
        .into_iter()
        .filter(|t| t.id.as_str().starts_with(prefix))
        .collect();

    if let Some(exact) = matches.iter().position(|t| t.id.as_str() == prefix) {
        return Ok(matches.swap_remove(exact));
    }
    match matches.len() {
        0 => Err(CliError::NotFound(prefix.to_string())),
        1 => Ok(matches.remove(0)),
        n => Err(CliError::Config(format!(
            "'{}' matches {} transfers; use more of the id",
            prefix, n
        ))),
    }
}
