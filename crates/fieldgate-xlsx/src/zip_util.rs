use std::io::Read;

use crate::package::PackageLimits;
use crate::XlsxError;

/// Lookup key for a part name. Producers disagree on case, separators and escaping, so
/// `XL\Workbook.xml`, `/xl/workbook.xml` and `xl/work%62ook.xml` share one key.
pub(crate) fn canonical_part_name(name: &str) -> String {
    let raw = name.as_bytes();
    let mut decoded = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let escaped = (raw[i] == b'%')
            .then(|| raw.get(i + 1..i + 3))
            .flatten()
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(byte) => {
                decoded.push(byte);
                i += 3;
            }
            None => {
                decoded.push(raw[i]);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded)
        .replace('\\', "/")
        .trim_start_matches('/')
        .to_ascii_lowercase()
}

/// Inflates the entries of one package while enforcing [`PackageLimits`].
#[derive(Debug)]
pub(crate) struct InflateGuard {
    limits: PackageLimits,
    inflated: u64,
}

impl InflateGuard {
    pub(crate) fn new(limits: PackageLimits) -> Self {
        Self {
            limits,
            inflated: 0,
        }
    }

    fn remaining(&self) -> u64 {
        self.limits.max_total_bytes.saturating_sub(self.inflated)
    }

    /// Read one entry. The declared size is checked up front and the read itself is capped, so a
    /// forged header cannot force an unbounded allocation.
    pub(crate) fn read<R: Read>(
        &mut self,
        entry: R,
        declared: u64,
        part: &str,
    ) -> Result<Vec<u8>, XlsxError> {
        let max_part = self.limits.max_part_bytes;
        let too_large = |size| XlsxError::PartTooLarge {
            part: part.to_string(),
            size,
            max: max_part,
        };
        if declared > max_part {
            return Err(too_large(declared));
        }
        if declared > self.remaining() {
            return Err(XlsxError::PackageTooLarge {
                total: self.inflated.saturating_add(declared),
                max: self.limits.max_total_bytes,
            });
        }

        let cap = max_part.min(self.remaining()).saturating_add(1);
        let mut buf = Vec::new();
        entry.take(cap).read_to_end(&mut buf)?;

        let size = buf.len() as u64;
        if size > max_part {
            return Err(too_large(size));
        }
        self.inflated = self.inflated.saturating_add(size);
        if self.inflated > self.limits.max_total_bytes {
            return Err(XlsxError::PackageTooLarge {
                total: self.inflated,
                max: self.limits.max_total_bytes,
            });
        }
        Ok(buf)
    }
}
