use std::io::{BufRead, Error, ErrorKind, Result, Write};

const BANNER: &str = r"
 ============================================================
   N-AUDIT SENTINEL          forensic session wrapper
 ============================================================
";

/// Writes the startup banner. Plain text only, safe for non-TTY outputs.
pub fn show_banner<W: Write>(w: &mut W) -> Result<()> {
    writeln!(w, "{BANNER}")
}

fn read_trimmed<R: BufRead>(r: &mut R) -> Result<String> {
    let mut line = String::new();
    if r.read_line(&mut line)? == 0 {
        // end of stream, distinct from an i/o error
        return Err(Error::new(ErrorKind::UnexpectedEof, "input stream closed"));
    }
    Ok(line.trim().to_string())
}

/// Prompts for the pentester and client names, one line each.
pub fn get_identity<R: BufRead, W: Write>(r: &mut R, w: &mut W) -> Result<(String, String)> {
    write!(w, "Pentester Name: ")?;
    w.flush()?;
    let pentester = read_trimmed(r)?;

    write!(w, "Client Name: ")?;
    w.flush()?;
    let client = read_trimmed(r)?;

    Ok((pentester, client))
}

// One collection loop of the double-empty-line protocol: a blank line arms
// the exit, a second consecutive blank line triggers it. Returns the entries
// and whether the stream is still open.
fn collect_entries<R: BufRead, W: Write>(
    r: &mut R,
    w: &mut W,
    prompt: &str,
) -> Result<(Vec<String>, bool)> {
    let mut entries = Vec::new();
    let mut armed = false;

    loop {
        write!(w, "{prompt}")?;
        w.flush()?;

        let mut line = String::new();
        if r.read_line(&mut line)? == 0 {
            // eof ends collection gracefully
            return Ok((entries, false));
        }
        let line = line.trim();

        if line.is_empty() {
            if armed {
                return Ok((entries, true));
            }
            armed = true;
            continue;
        }
        armed = false;
        entries.push(line.to_string());
    }
}

/// Collects the target scope: first IP/CIDR entries, then domains, each loop
/// terminated by two consecutive empty lines. End-of-stream ends the whole
/// collection without error.
pub fn get_scope<R: BufRead, W: Write>(
    r: &mut R,
    w: &mut W,
) -> Result<(Vec<String>, Vec<String>)> {
    writeln!(w, "[Layer 3] Enter Target IP/CIDR (Double Enter to continue):")?;
    let (ips, open) = collect_entries(r, w, "IP/CIDR> ")?;
    if !open {
        return Ok((ips, Vec::new()));
    }

    writeln!(w, "[Layer 7] Enter Target Domain (Double Enter to finish):")?;
    let (domains, _) = collect_entries(r, w, "Domain> ")?;

    Ok((ips, domains))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_trims_both_lines() {
        let mut input = "  Jane Doe  \n ACME Corp \n".as_bytes();
        let mut out = Vec::new();

        let (pentester, client) = get_identity(&mut input, &mut out).unwrap();
        assert_eq!(pentester, "Jane Doe");
        assert_eq!(client, "ACME Corp");

        let prompts = String::from_utf8(out).unwrap();
        assert!(prompts.contains("Pentester Name: "));
        assert!(prompts.contains("Client Name: "));
    }

    #[test]
    fn identity_reports_eof_distinctly() {
        let mut input = "only one\n".as_bytes();
        let mut out = Vec::new();

        let err = get_identity(&mut input, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn scope_transcript_collects_both_layers() {
        let mut input = "1.2.3.4\n\n\nexample.com\n\n\n".as_bytes();
        let mut out = Vec::new();

        let (ips, domains) = get_scope(&mut input, &mut out).unwrap();
        assert_eq!(ips, vec!["1.2.3.4"]);
        assert_eq!(domains, vec!["example.com"]);
    }

    #[test]
    fn single_empty_line_does_not_exit() {
        let mut input = "1.2.3.4\n\n5.6.7.8\n\n\n\n\n".as_bytes();
        let mut out = Vec::new();

        let (ips, domains) = get_scope(&mut input, &mut out).unwrap();
        assert_eq!(ips, vec!["1.2.3.4", "5.6.7.8"]);
        assert!(domains.is_empty());
    }

    #[test]
    fn eof_ends_scope_gracefully() {
        let mut input = "10.0.0.1\n".as_bytes();
        let mut out = Vec::new();

        let (ips, domains) = get_scope(&mut input, &mut out).unwrap();
        assert_eq!(ips, vec!["10.0.0.1"]);
        assert!(domains.is_empty());
    }

    #[test]
    fn whitespace_only_lines_count_as_empty() {
        let mut input = "10.0.0.1\n   \n\t\nexample.com\n\n\n".as_bytes();
        let mut out = Vec::new();

        let (ips, domains) = get_scope(&mut input, &mut out).unwrap();
        assert_eq!(ips, vec!["10.0.0.1"]);
        assert_eq!(domains, vec!["example.com"]);
    }

    #[test]
    fn banner_is_plain_text() {
        let mut out = Vec::new();
        show_banner(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("N-AUDIT SENTINEL"));
        assert!(!text.contains('\x1b'));
    }
}
