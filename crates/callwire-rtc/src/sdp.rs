//! Pure text transforms over session descriptions.
//!
//! Some negotiation paths assume session-level rather than per-media ICE and
//! DTLS credentials. [`canonicalize`] rewrites every media section after the
//! first to share the first section's credentials, candidates and port.
//! [`inject_candidates`] appends externally gathered candidates to every
//! media section.

const MEDIA_PREFIX: &str = "m=";
const UFRAG_PREFIX: &str = "a=ice-ufrag:";
const PWD_PREFIX: &str = "a=ice-pwd:";
const FINGERPRINT_PREFIX: &str = "a=fingerprint:";
const CANDIDATE_PREFIX: &str = "a=candidate:";
const END_OF_CANDIDATES: &str = "a=end-of-candidates";

fn is_end_of_candidates(line: &str) -> bool {
    line.trim_end_matches('\r') == END_OF_CANDIDATES
}

/// Carriage return to append to synthesized lines so CRLF input stays CRLF.
fn line_suffix(sdp: &str) -> &'static str {
    if sdp.contains("\r\n") { "\r" } else { "" }
}

/// Splits into lines for processing. Returns the lines and whether the
/// input carried a trailing newline to restore on output.
fn split_lines(sdp: &str) -> (Vec<&str>, bool) {
    let trailing_newline = sdp.ends_with('\n');
    let mut lines: Vec<&str> = sdp.split('\n').collect();
    if trailing_newline {
        lines.pop();
    }
    (lines, trailing_newline)
}

fn join_lines(lines: Vec<String>, trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}

/// Index of the first line of each media section.
fn media_section_starts(lines: &[&str]) -> Vec<usize> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.starts_with(MEDIA_PREFIX))
        .map(|(i, _)| i)
        .collect()
}

/// Replaces the port field of an `m=` line, leaving the rest intact.
fn rewrite_port(m_line: &str, port: &str) -> String {
    let mut fields: Vec<&str> = m_line.split(' ').collect();
    if fields.len() > 1 {
        fields[1] = port;
    }
    fields.join(" ")
}

/// Rewrites every media section after the first so its ICE username
/// fragment, password, DTLS fingerprints, candidate list and port match the
/// first section verbatim. Byte-identical no-op on descriptions with fewer
/// than two media sections. Every unrelated line is preserved in order.
pub fn canonicalize(sdp: &str) -> String {
    let (lines, trailing_newline) = split_lines(sdp);
    let sections = media_section_starts(&lines);
    if sections.len() < 2 {
        return sdp.to_string();
    }

    // Reference values come from the first media section.
    let first = &lines[sections[0]..sections[1]];
    let ref_port = first[0].split(' ').nth(1).unwrap_or("").to_string();
    let ref_ufrag = first.iter().find(|l| l.starts_with(UFRAG_PREFIX)).copied();
    let ref_pwd = first.iter().find(|l| l.starts_with(PWD_PREFIX)).copied();
    let ref_fingerprints: Vec<&str> = first
        .iter()
        .filter(|l| l.starts_with(FINGERPRINT_PREFIX))
        .copied()
        .collect();
    let mut ref_candidates: Vec<String> = first
        .iter()
        .filter(|l| l.starts_with(CANDIDATE_PREFIX))
        .map(|l| l.to_string())
        .collect();
    if !ref_candidates.is_empty() {
        ref_candidates.push(format!("{}{}", END_OF_CANDIDATES, line_suffix(sdp)));
    }

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    out.extend(lines[..sections[1]].iter().map(|l| l.to_string()));

    for (n, &start) in sections.iter().enumerate().skip(1) {
        let end = sections.get(n + 1).copied().unwrap_or(lines.len());
        let section = &lines[start..end];

        out.push(rewrite_port(section[0], &ref_port));

        let mut candidates_written = false;
        let mut fingerprints_written = false;
        for &line in &section[1..] {
            if line.starts_with(CANDIDATE_PREFIX) || is_end_of_candidates(line) {
                // The section's own candidates are dropped; the reference
                // block goes where its first candidate used to be.
                if !candidates_written {
                    out.extend(ref_candidates.iter().map(|l| l.to_string()));
                    candidates_written = true;
                }
            } else if line.starts_with(UFRAG_PREFIX)
                && let Some(ufrag) = ref_ufrag
            {
                out.push(ufrag.to_string());
            } else if line.starts_with(PWD_PREFIX)
                && let Some(pwd) = ref_pwd
            {
                out.push(pwd.to_string());
            } else if line.starts_with(FINGERPRINT_PREFIX) && !ref_fingerprints.is_empty() {
                if !fingerprints_written {
                    out.extend(ref_fingerprints.iter().map(|l| l.to_string()));
                    fingerprints_written = true;
                }
            } else {
                out.push(line.to_string());
            }
        }

        if !candidates_written && !ref_candidates.is_empty() {
            out.extend(ref_candidates.iter().map(|l| l.to_string()));
        }
    }

    join_lines(out, trailing_newline)
}

/// Appends one `a=candidate:` line per entry, followed by a single
/// end-of-candidates marker, to every media section. An empty candidate
/// list or a description with no media sections is a no-op.
pub fn inject_candidates(sdp: &str, candidates: &[String]) -> String {
    let (lines, trailing_newline) = split_lines(sdp);
    if candidates.is_empty() || media_section_starts(&lines).is_empty() {
        return sdp.to_string();
    }

    let suffix = line_suffix(sdp);
    let candidate_block = |out: &mut Vec<String>| {
        for candidate in candidates {
            out.push(format!("{CANDIDATE_PREFIX}{candidate}{suffix}"));
        }
        out.push(format!("{END_OF_CANDIDATES}{suffix}"));
    };

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut in_media = false;
    for line in &lines {
        if line.starts_with(MEDIA_PREFIX) {
            if in_media {
                candidate_block(&mut out);
            }
            in_media = true;
        }
        out.push(line.to_string());
    }
    if in_media {
        candidate_block(&mut out);
    }

    join_lines(out, trailing_newline)
}
