use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::process::ProcessId;

/// One memory reference from the access trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub pid: ProcessId,
    pub vaddr: u32,
}

/// Parse whitespace-separated `pid vaddr` pairs. Line breaks carry no meaning.
pub fn parse_trace(content: &str) -> Result<Vec<Access>> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    if tokens.len() % 2 != 0 {
        return Err(Error::InvalidTrace(format!(
            "trace has {} tokens, expected pid/address pairs",
            tokens.len()
        )));
    }

    let mut accesses = Vec::with_capacity(tokens.len() / 2);
    for chunk in tokens.chunks(2) {
        let pid: u32 = chunk[0]
            .parse()
            .map_err(|_| Error::InvalidTrace(format!("invalid process id: {}", chunk[0])))?;
        let vaddr = parse_address(chunk[1])?;
        accesses.push(Access {
            pid: ProcessId(pid),
            vaddr,
        });
    }
    Ok(accesses)
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_address(token: &str) -> Result<u32> {
    let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| Error::InvalidTrace(format!("invalid virtual address: {}", token)))
}

pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Vec<Access>> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_trace(&content)
}

pub fn write_results<P: AsRef<Path>>(path: P, results: &[i64]) -> Result<()> {
    let output: Vec<String> = results.iter().map(|r| r.to_string()).collect();
    fs::write(path.as_ref(), output.join(" "))?;
    Ok(())
}
