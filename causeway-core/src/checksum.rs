//! CRC32 checksums over migration script content (Flyway-compatible).

/// Compute the checksum of migration script content.
///
/// Matches the reference tool byte-for-byte: a leading UTF-8 BOM is dropped,
/// the content is split into lines with terminators stripped, each line's
/// UTF-8 bytes are fed to a CRC32 in order, and the final register is
/// reinterpreted as a signed 32-bit integer.
///
/// Because no terminator bytes reach the CRC, `\n`, `\r` and `\r\n` are
/// interchangeable and a trailing newline does not change the result.
pub fn checksum(content: &str) -> i32 {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut hasher = crc32fast::Hasher::new();
    for line in split_lines(content) {
        hasher.update(line.as_bytes());
    }
    hasher.finalize() as i32
}

/// Split content on `\r\n`, `\r` or `\n`, excluding the terminators.
///
/// Unlike `str::lines`, a lone `\r` is a terminator too, and a trailing
/// terminator yields a final empty line (which contributes no bytes).
pub(crate) fn split_lines(content: &str) -> Lines<'_> {
    Lines {
        rest: Some(content),
    }
}

pub(crate) struct Lines<'a> {
    rest: Option<&'a str>,
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        match rest.find(['\r', '\n']) {
            Some(idx) => {
                let line = &rest[..idx];
                let next = if rest[idx..].starts_with("\r\n") {
                    idx + 2
                } else {
                    idx + 1
                };
                self.rest = Some(&rest[next..]);
                Some(line)
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}
