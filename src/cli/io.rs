//! JSON output for the CLI: one pretty-printed document per command on stdout

use std::io::{self, Write};

use serde::Serialize;

use super::errors::CliResult;

/// Write a JSON document to stdout
pub fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_json_to(&mut out, value)
}

pub(crate) fn write_json_to<W: Write, T: Serialize>(out: &mut W, value: &T) -> CliResult<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_json_ends_with_newline() {
        let mut buf = Vec::new();
        write_json_to(&mut buf, &json!({"file_len": 55})).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\"file_len\": 55"));
    }
}
