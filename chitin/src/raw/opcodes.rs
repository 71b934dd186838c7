use chitin_derive::FromRepr;

use crate::errors::{Result, TransformError};
use crate::utilities::Reader;

macro_rules! define_opcodes {
	(
		enum $name:ident {
			$(
				$(#[$attr:meta])*
				$ident:ident $([$width:tt])? = $discriminant:literal
			),* $(,)?
		}
	) => {
		#[repr(u8)]
		#[allow(non_camel_case_types)]
		#[derive(Debug, Copy, Clone, Eq, PartialEq, FromRepr)]
		pub enum $name {
			$(
				$(#[$attr])*
				$ident = $discriminant
			),*
		}

		impl $name {
			/// Fixed operand byte count, or `None` for the variable-length
			/// forms (`wide` and the two switches).
			pub fn operand_bytes(self) -> Option<usize> {
				match self {
					$(Self::$ident => define_opcodes!(@width $($width)?)),*
				}
			}
		}
	};
	(@width) => { Some(0) };
	(@width var) => { None };
	(@width $w:literal) => { Some($w) };
}

define_opcodes! {
	enum OpCode {
		nop = 0x00,
		aconst_null = 0x01,
		iconst_m1 = 0x02,
		iconst_0 = 0x03,
		iconst_1 = 0x04,
		iconst_2 = 0x05,
		iconst_3 = 0x06,
		iconst_4 = 0x07,
		iconst_5 = 0x08,
		lconst_0 = 0x09,
		lconst_1 = 0x0a,
		fconst_0 = 0x0b,
		fconst_1 = 0x0c,
		fconst_2 = 0x0d,
		dconst_0 = 0x0e,
		dconst_1 = 0x0f,
		bipush [1] = 0x10,
		sipush [2] = 0x11,
		ldc [1] = 0x12,
		ldc_w [2] = 0x13,
		ldc2_w [2] = 0x14,
		iload [1] = 0x15,
		lload [1] = 0x16,
		fload [1] = 0x17,
		dload [1] = 0x18,
		aload [1] = 0x19,
		iload_0 = 0x1a,
		iload_1 = 0x1b,
		iload_2 = 0x1c,
		iload_3 = 0x1d,
		lload_0 = 0x1e,
		lload_1 = 0x1f,
		lload_2 = 0x20,
		lload_3 = 0x21,
		fload_0 = 0x22,
		fload_1 = 0x23,
		fload_2 = 0x24,
		fload_3 = 0x25,
		dload_0 = 0x26,
		dload_1 = 0x27,
		dload_2 = 0x28,
		dload_3 = 0x29,
		aload_0 = 0x2a,
		aload_1 = 0x2b,
		aload_2 = 0x2c,
		aload_3 = 0x2d,
		iaload = 0x2e,
		laload = 0x2f,
		faload = 0x30,
		daload = 0x31,
		aaload = 0x32,
		baload = 0x33,
		caload = 0x34,
		saload = 0x35,
		istore [1] = 0x36,
		lstore [1] = 0x37,
		fstore [1] = 0x38,
		dstore [1] = 0x39,
		astore [1] = 0x3a,
		istore_0 = 0x3b,
		istore_1 = 0x3c,
		istore_2 = 0x3d,
		istore_3 = 0x3e,
		lstore_0 = 0x3f,
		lstore_1 = 0x40,
		lstore_2 = 0x41,
		lstore_3 = 0x42,
		fstore_0 = 0x43,
		fstore_1 = 0x44,
		fstore_2 = 0x45,
		fstore_3 = 0x46,
		dstore_0 = 0x47,
		dstore_1 = 0x48,
		dstore_2 = 0x49,
		dstore_3 = 0x4a,
		astore_0 = 0x4b,
		astore_1 = 0x4c,
		astore_2 = 0x4d,
		astore_3 = 0x4e,
		iastore = 0x4f,
		lastore = 0x50,
		fastore = 0x51,
		dastore = 0x52,
		aastore = 0x53,
		bastore = 0x54,
		castore = 0x55,
		sastore = 0x56,
		pop = 0x57,
		pop2 = 0x58,
		dup = 0x59,
		dup_x1 = 0x5a,
		dup_x2 = 0x5b,
		dup2 = 0x5c,
		dup2_x1 = 0x5d,
		dup2_x2 = 0x5e,
		swap = 0x5f,
		iadd = 0x60,
		ladd = 0x61,
		fadd = 0x62,
		dadd = 0x63,
		isub = 0x64,
		lsub = 0x65,
		fsub = 0x66,
		dsub = 0x67,
		imul = 0x68,
		lmul = 0x69,
		fmul = 0x6a,
		dmul = 0x6b,
		idiv = 0x6c,
		ldiv = 0x6d,
		fdiv = 0x6e,
		ddiv = 0x6f,
		irem = 0x70,
		lrem = 0x71,
		frem = 0x72,
		drem = 0x73,
		ineg = 0x74,
		lneg = 0x75,
		fneg = 0x76,
		dneg = 0x77,
		ishl = 0x78,
		lshl = 0x79,
		ishr = 0x7a,
		lshr = 0x7b,
		iushr = 0x7c,
		lushr = 0x7d,
		iand = 0x7e,
		land = 0x7f,
		ior = 0x80,
		lor = 0x81,
		ixor = 0x82,
		lxor = 0x83,
		iinc [2] = 0x84,
		i2l = 0x85,
		i2f = 0x86,
		i2d = 0x87,
		l2i = 0x88,
		l2f = 0x89,
		l2d = 0x8a,
		f2i = 0x8b,
		f2l = 0x8c,
		f2d = 0x8d,
		d2i = 0x8e,
		d2l = 0x8f,
		d2f = 0x90,
		i2b = 0x91,
		i2c = 0x92,
		i2s = 0x93,
		lcmp = 0x94,
		fcmpl = 0x95,
		fcmpg = 0x96,
		dcmpl = 0x97,
		dcmpg = 0x98,
		ifeq [2] = 0x99,
		ifne [2] = 0x9a,
		iflt [2] = 0x9b,
		ifge [2] = 0x9c,
		ifgt [2] = 0x9d,
		ifle [2] = 0x9e,
		if_icmpeq [2] = 0x9f,
		if_icmpne [2] = 0xa0,
		if_icmplt [2] = 0xa1,
		if_icmpge [2] = 0xa2,
		if_icmpgt [2] = 0xa3,
		if_icmple [2] = 0xa4,
		if_acmpeq [2] = 0xa5,
		if_acmpne [2] = 0xa6,
		goto [2] = 0xa7,
		jsr [2] = 0xa8,
		ret [1] = 0xa9,
		tableswitch [var] = 0xaa,
		lookupswitch [var] = 0xab,
		ireturn = 0xac,
		lreturn = 0xad,
		freturn = 0xae,
		dreturn = 0xaf,
		areturn = 0xb0,
		r#return = 0xb1,
		getstatic [2] = 0xb2,
		putstatic [2] = 0xb3,
		getfield [2] = 0xb4,
		putfield [2] = 0xb5,
		invokevirtual [2] = 0xb6,
		invokespecial [2] = 0xb7,
		invokestatic [2] = 0xb8,
		invokeinterface [4] = 0xb9,
		invokedynamic [4] = 0xba,
		new [2] = 0xbb,
		newarray [1] = 0xbc,
		anewarray [2] = 0xbd,
		arraylength = 0xbe,
		athrow = 0xbf,
		checkcast [2] = 0xc0,
		instanceof [2] = 0xc1,
		monitorenter = 0xc2,
		monitorexit = 0xc3,
		wide [var] = 0xc4,
		multianewarray [3] = 0xc5,
		ifnull [2] = 0xc6,
		ifnonnull [2] = 0xc7,
		goto_w [4] = 0xc8,
		jsr_w [4] = 0xc9,
	}
}

impl OpCode {
	pub fn is_invocation(self) -> bool {
		matches!(
			self,
			Self::invokevirtual | Self::invokespecial | Self::invokestatic | Self::invokeinterface
		)
	}

	pub(crate) fn decode(byte: u8) -> Result<Self> {
		Self::from_repr(byte).ok_or_else(|| TransformError::malformed("unknown opcode"))
	}
}

/// Offset just past the instruction starting at `pc`. Switch padding is
/// computed from `pc` relative to the start of the code array.
pub(crate) fn instruction_end(code: &[u8], pc: usize) -> Result<usize> {
	let mut reader = Reader::at(code, pc);
	let op = OpCode::decode(reader.u8()?)?;
	if let Some(operands) = op.operand_bytes() {
		reader.skip(operands)?;
		return Ok(reader.pos());
	}

	match op {
		OpCode::wide => {
			let modified = OpCode::decode(reader.u8()?)?;
			reader.skip(if modified == OpCode::iinc { 4 } else { 2 })?;
		}
		OpCode::tableswitch => {
			reader.skip(switch_padding(pc))?;
			reader.skip(4)?; // default
			let low = reader.i32()?;
			let high = reader.i32()?;
			if high < low {
				return Err(TransformError::malformed("inverted tableswitch bounds"));
			}
			let count = (high as i64 - low as i64 + 1) as usize;
			reader.skip(count.checked_mul(4).ok_or_else(|| TransformError::malformed("oversized tableswitch"))?)?;
		}
		OpCode::lookupswitch => {
			reader.skip(switch_padding(pc))?;
			reader.skip(4)?; // default
			let pairs = reader.i32()?;
			if pairs < 0 {
				return Err(TransformError::malformed("negative lookupswitch pair count"));
			}
			reader.skip((pairs as usize).checked_mul(8).ok_or_else(|| TransformError::malformed("oversized lookupswitch"))?)?;
		}
		_ => return Err(TransformError::Internal("fixed-width opcode took variable path")),
	}
	Ok(reader.pos())
}

/// Bytes of alignment padding following a switch opcode at `pc`.
pub(crate) fn switch_padding(pc: usize) -> usize {
	3 - (pc % 4)
}
