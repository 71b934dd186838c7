use crate::errors::{Result, TransformError};
use crate::utilities::Writer;

#[derive(Debug)]
pub(crate) struct Replacement {
	pub offset: usize,
	pub original_len: usize,
	pub bytes: Vec<u8>,
}

/// Ordered map from original-buffer offsets to replacement byte ranges.
/// Built in offset order where the driver can, re-sorted at assembly
/// otherwise. A zero-length original range appends new bytes in place.
#[derive(Debug, Default)]
pub(crate) struct RegionLedger {
	entries: Vec<Replacement>,
}

impl RegionLedger {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn record(&mut self, offset: usize, original_len: usize, bytes: Vec<u8>) {
		self.entries.push(Replacement { offset, original_len, bytes });
	}

	/// Net growth of the buffer once every replacement is applied.
	pub fn delta(&self) -> isize {
		self.entries.iter().map(|r| r.bytes.len() as isize - r.original_len as isize).sum()
	}

	/// Walks `source` from `from`, emitting original bytes up to each
	/// replacement key, then the replacement, then skipping the replaced
	/// range. A key behind the cursor means two replacements overlapped.
	pub fn assemble(&mut self, source: &[u8], from: usize, out: &mut Writer) -> Result<()> {
		self.entries.sort_by_key(|r| r.offset);

		let mut cursor = from;
		for replacement in &self.entries {
			if replacement.offset < cursor {
				return Err(TransformError::Internal("overlapping ledger replacements"));
			}
			let skip_end = replacement.offset + replacement.original_len;
			if skip_end > source.len() {
				return Err(TransformError::Internal("ledger replacement outside source"));
			}
			out.bytes(&source[cursor..replacement.offset]);
			out.bytes(&replacement.bytes);
			cursor = skip_end;
		}
		out.bytes(&source[cursor..]);
		Ok(())
	}
}
