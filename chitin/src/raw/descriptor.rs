use crate::errors::{Result, TransformError};

/// Verifier-level categories of a value. Byte, short, char and boolean all
/// collapse into `Int` on the operand stack.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TypeKind {
	Int,
	Long,
	Float,
	Double,
	Reference,
}

impl TypeKind {
	pub fn slots(self) -> u16 {
		match self {
			Self::Long | Self::Double => 2,
			_ => 1,
		}
	}
}

/// One parameter or return type, sliced out of the descriptor string.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ParamType<'l> {
	pub kind: TypeKind,
	/// Descriptor text of this type, e.g. `I`, `[J` or `Ljava/util/List;`.
	pub text: &'l str,
}

impl<'l> ParamType<'l> {
	pub fn base(&self) -> u8 {
		self.text.as_bytes()[0]
	}

	pub fn is_wide(&self) -> bool {
		self.kind.slots() == 2
	}

	pub fn is_array(&self) -> bool {
		self.base() == b'['
	}

	/// Constant-pool class name for a reference type: the inner name for an
	/// `L` form, the raw descriptor for arrays.
	pub fn class_name(&self) -> &'l str {
		match self.base() {
			b'L' => &self.text[1..self.text.len() - 1],
			_ => self.text,
		}
	}
}

#[derive(Debug)]
pub struct MethodDescriptor<'l> {
	raw: &'l str,
	pub params: Vec<ParamType<'l>>,
	/// `None` encodes a void return.
	pub ret: Option<ParamType<'l>>,
}

impl<'l> MethodDescriptor<'l> {
	pub fn parse(raw: &'l str) -> Result<Self> {
		let bytes = raw.as_bytes();
		if bytes.first() != Some(&b'(') {
			return Err(bad_descriptor());
		}

		let mut params = Vec::new();
		let mut pos = 1;
		while bytes.get(pos) != Some(&b')') {
			let (param, next) = parse_field_type(raw, pos)?;
			params.push(param);
			pos = next;
		}
		pos += 1;

		let ret = match bytes.get(pos) {
			Some(b'V') if pos + 1 == bytes.len() => None,
			Some(_) => {
				let (ret, next) = parse_field_type(raw, pos)?;
				if next != bytes.len() {
					return Err(bad_descriptor());
				}
				Some(ret)
			}
			None => return Err(bad_descriptor()),
		};

		Ok(Self { raw, params, ret })
	}

	pub fn raw(&self) -> &'l str {
		self.raw
	}

	/// Local slots consumed by the parameters alone (no receiver).
	pub fn param_slots(&self) -> u16 {
		self.params.iter().map(|p| p.kind.slots()).sum()
	}
}

fn parse_field_type(raw: &str, pos: usize) -> Result<(ParamType<'_>, usize)> {
	let bytes = raw.as_bytes();
	let start = pos;
	let mut pos = pos;

	while bytes.get(pos) == Some(&b'[') {
		pos += 1;
	}
	let dimensions = pos - start;

	let (kind, end) = match bytes.get(pos) {
		Some(b'B' | b'C' | b'I' | b'S' | b'Z') => (TypeKind::Int, pos + 1),
		Some(b'J') => (TypeKind::Long, pos + 1),
		Some(b'F') => (TypeKind::Float, pos + 1),
		Some(b'D') => (TypeKind::Double, pos + 1),
		Some(b'L') => {
			let semi = bytes[pos..].iter().position(|b| *b == b';').ok_or_else(bad_descriptor)?;
			if semi == 1 {
				return Err(bad_descriptor());
			}
			(TypeKind::Reference, pos + semi + 1)
		}
		_ => return Err(bad_descriptor()),
	};

	let kind = if dimensions > 0 { TypeKind::Reference } else { kind };
	Ok((ParamType { kind, text: &raw[start..end] }, end))
}

/// Box class and `valueOf` descriptor for a primitive base type.
pub(crate) fn box_class(base: u8) -> Option<(&'static str, &'static str)> {
	Some(match base {
		b'Z' => ("java/lang/Boolean", "(Z)Ljava/lang/Boolean;"),
		b'B' => ("java/lang/Byte", "(B)Ljava/lang/Byte;"),
		b'C' => ("java/lang/Character", "(C)Ljava/lang/Character;"),
		b'S' => ("java/lang/Short", "(S)Ljava/lang/Short;"),
		b'I' => ("java/lang/Integer", "(I)Ljava/lang/Integer;"),
		b'J' => ("java/lang/Long", "(J)Ljava/lang/Long;"),
		b'F' => ("java/lang/Float", "(F)Ljava/lang/Float;"),
		b'D' => ("java/lang/Double", "(D)Ljava/lang/Double;"),
		_ => return None,
	})
}

/// Unboxing conversion for a primitive base type: box class, accessor name
/// and accessor descriptor.
pub(crate) fn unbox_method(base: u8) -> Option<(&'static str, &'static str, &'static str)> {
	Some(match base {
		b'Z' => ("java/lang/Boolean", "booleanValue", "()Z"),
		b'B' => ("java/lang/Byte", "byteValue", "()B"),
		b'C' => ("java/lang/Character", "charValue", "()C"),
		b'S' => ("java/lang/Short", "shortValue", "()S"),
		b'I' => ("java/lang/Integer", "intValue", "()I"),
		b'J' => ("java/lang/Long", "longValue", "()J"),
		b'F' => ("java/lang/Float", "floatValue", "()F"),
		b'D' => ("java/lang/Double", "doubleValue", "()D"),
		_ => None?,
	})
}

/// Box class carrying the `TYPE` field that names a primitive class object.
/// `V` maps to `java/lang/Void`.
pub(crate) fn primitive_type_holder(base: u8) -> Option<&'static str> {
	Some(match base {
		b'Z' => "java/lang/Boolean",
		b'B' => "java/lang/Byte",
		b'C' => "java/lang/Character",
		b'S' => "java/lang/Short",
		b'I' => "java/lang/Integer",
		b'J' => "java/lang/Long",
		b'F' => "java/lang/Float",
		b'D' => "java/lang/Double",
		b'V' => "java/lang/Void",
		_ => return None,
	})
}

fn bad_descriptor() -> TransformError {
	TransformError::malformed("invalid method descriptor")
}
