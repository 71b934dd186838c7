use std::rc::Rc;

use crate::errors::{Result, TransformError};
use crate::raw::descriptor::MethodDescriptor;
use crate::raw::opcodes::{instruction_end, OpCode};
use crate::raw::pool::{ConstantPool, ConstantTag};
use crate::utilities::{Reader, Writer};

const ITEM_TOP: u8 = 0;
const ITEM_INT: u8 = 1;
const ITEM_FLOAT: u8 = 2;
const ITEM_DOUBLE: u8 = 3;
const ITEM_LONG: u8 = 4;
const ITEM_NULL: u8 = 5;
const ITEM_UNINIT_THIS: u8 = 6;
const ITEM_OBJECT: u8 = 7;
const ITEM_UNINIT: u8 = 8;

const SAME_EXTENDED: u8 = 251;
const FULL_FRAME: u8 = 255;

/// Verifier view of one value. Wide types occupy two slots while walking;
/// they collapse to a single item when a frame is written.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum VType {
	Top,
	Int,
	Float,
	Long,
	Double,
	Null,
	UninitThis,
	/// Binary class name, or an array descriptor for array classes.
	Object(Rc<str>),
	/// Value produced by the NEW opcode at this pc.
	Uninit(u16),
}

impl VType {
	fn is_wide(&self) -> bool {
		matches!(self, Self::Long | Self::Double)
	}

	fn object(name: &str) -> Self {
		Self::Object(Rc::from(name))
	}
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct FrameState {
	pub locals: Vec<VType>,
	pub stack: Vec<VType>,
}

impl FrameState {
	/// Frame at method entry, derived from the access flags and descriptor.
	pub fn initial(is_static: bool, this_class: &str, descriptor: &MethodDescriptor<'_>, is_ctor: bool) -> Self {
		let mut locals = Vec::new();
		if !is_static {
			locals.push(if is_ctor { VType::UninitThis } else { VType::object(this_class) });
		}
		for param in &descriptor.params {
			push_descriptor_type(&mut locals, param.text);
		}
		Self { locals, stack: Vec::new() }
	}

	fn pop_slots(&mut self, count: usize) -> Result<()> {
		if self.stack.len() < count {
			return Err(TransformError::malformed("operand stack underflow"));
		}
		self.stack.truncate(self.stack.len() - count);
		Ok(())
	}

	fn pop1(&mut self) -> Result<VType> {
		self.stack.pop().ok_or_else(|| TransformError::malformed("operand stack underflow"))
	}

	fn set_local(&mut self, index: usize, value: VType) {
		let wide = value.is_wide();
		let needed = index + if wide { 2 } else { 1 };
		if self.locals.len() < needed {
			self.locals.resize(needed, VType::Top);
		}
		// Storing into the high half of a wide value kills that value.
		if index > 0 && self.locals[index - 1].is_wide() {
			self.locals[index - 1] = VType::Top;
		}
		self.locals[index] = value;
		if wide {
			self.locals[index + 1] = VType::Top;
		}
	}

	fn local(&self, index: usize) -> VType {
		self.locals.get(index).cloned().unwrap_or(VType::Top)
	}

	/// An invoked constructor initializes its receiver: every copy of the
	/// matching uninitialized marker becomes the constructed type.
	fn initialize(&mut self, marker: &VType, class: &str) {
		let initialized = VType::object(class);
		for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
			if slot == marker {
				*slot = initialized.clone();
			}
		}
	}
}

fn push_descriptor_type(slots: &mut Vec<VType>, text: &str) {
	match text.as_bytes()[0] {
		b'B' | b'C' | b'I' | b'S' | b'Z' => slots.push(VType::Int),
		b'F' => slots.push(VType::Float),
		b'J' => {
			slots.push(VType::Long);
			slots.push(VType::Top);
		}
		b'D' => {
			slots.push(VType::Double);
			slots.push(VType::Top);
		}
		b'L' => slots.push(VType::object(&text[1..text.len() - 1])),
		_ => slots.push(VType::object(text)),
	}
}

fn array_element(name: &str) -> VType {
	match name.strip_prefix('[') {
		Some(elem) if elem.starts_with('L') => VType::object(&elem[1..elem.len() - 1]),
		Some(elem) if elem.starts_with('[') => VType::object(elem),
		Some("J") => VType::Long,
		Some("D") => VType::Double,
		Some("F") => VType::Float,
		_ => VType::Int,
	}
}

fn primitive_array_name(atype: u8) -> Result<&'static str> {
	Ok(match atype {
		4 => "[Z",
		5 => "[C",
		6 => "[F",
		7 => "[D",
		8 => "[B",
		9 => "[S",
		10 => "[I",
		11 => "[J",
		_ => return Err(TransformError::malformed("invalid primitive array type")),
	})
}

fn ldc_type(pool: &ConstantPool<'_>, index: u16) -> Result<VType> {
	Ok(match pool.tag_at(index)? {
		ConstantTag::Integer => VType::Int,
		ConstantTag::Float => VType::Float,
		ConstantTag::String => VType::object("java/lang/String"),
		ConstantTag::Class => VType::object("java/lang/Class"),
		ConstantTag::MethodHandle => VType::object("java/lang/invoke/MethodHandle"),
		ConstantTag::MethodType => VType::object("java/lang/invoke/MethodType"),
		ConstantTag::Dynamic => {
			let mut reader = pool.entry_reader(index)?;
			reader.skip(2)?;
			let (_, descriptor) = pool.name_and_type(reader.u16()?)?;
			let mut slots = Vec::new();
			push_descriptor_type(&mut slots, &descriptor);
			slots.swap_remove(0)
		}
		_ => return Err(TransformError::malformed("unloadable constant kind")),
	})
}

/// Interprets `code[0..to]` starting from `state`, leaving the frame as it
/// stands just before the instruction at `to`. The walk is linear; callers
/// derive branch-target frames from the state at the branch itself.
pub(crate) fn interpret(
	code: &[u8],
	to: usize,
	state: &mut FrameState,
	pool: &ConstantPool<'_>,
	this_class: &str,
) -> Result<()> {
	let mut pc = 0usize;
	while pc < to {
		let end = instruction_end(code, pc)?;
		step(code, pc, state, pool, this_class)?;
		pc = end;
	}
	if pc != to {
		return Err(TransformError::Internal("frame walk target inside an instruction"));
	}
	Ok(())
}

fn step(
	code: &[u8],
	pc: usize,
	state: &mut FrameState,
	pool: &ConstantPool<'_>,
	this_class: &str,
) -> Result<()> {
	use OpCode as Op;

	let mut operands = Reader::at(code, pc + 1);
	let op = Op::decode(code[pc])?;
	match op {
		Op::nop => {}
		Op::aconst_null => state.stack.push(VType::Null),
		Op::iconst_m1 | Op::iconst_0 | Op::iconst_1 | Op::iconst_2 | Op::iconst_3 | Op::iconst_4
		| Op::iconst_5 | Op::bipush | Op::sipush => state.stack.push(VType::Int),
		Op::lconst_0 | Op::lconst_1 => {
			state.stack.push(VType::Long);
			state.stack.push(VType::Top);
		}
		Op::fconst_0 | Op::fconst_1 | Op::fconst_2 => state.stack.push(VType::Float),
		Op::dconst_0 | Op::dconst_1 => {
			state.stack.push(VType::Double);
			state.stack.push(VType::Top);
		}
		Op::ldc => {
			let value = ldc_type(pool, operands.u8()? as u16)?;
			state.stack.push(value);
		}
		Op::ldc_w => {
			let value = ldc_type(pool, operands.u16()?)?;
			state.stack.push(value);
		}
		Op::ldc2_w => {
			let wide = match pool.tag_at(operands.u16()?)? {
				ConstantTag::Long => VType::Long,
				ConstantTag::Double => VType::Double,
				ConstantTag::Dynamic => VType::Long,
				_ => return Err(TransformError::malformed("ldc2_w of narrow constant")),
			};
			state.stack.push(wide);
			state.stack.push(VType::Top);
		}
		Op::iload => load(state, operands.u8()? as usize, VType::Int),
		Op::fload => load(state, operands.u8()? as usize, VType::Float),
		Op::lload => load_wide(state, VType::Long),
		Op::dload => load_wide(state, VType::Double),
		Op::aload => {
			let value = state.local(operands.u8()? as usize);
			state.stack.push(value);
		}
		Op::iload_0 | Op::iload_1 | Op::iload_2 | Op::iload_3 => state.stack.push(VType::Int),
		Op::fload_0 | Op::fload_1 | Op::fload_2 | Op::fload_3 => state.stack.push(VType::Float),
		Op::lload_0 | Op::lload_1 | Op::lload_2 | Op::lload_3 => load_wide(state, VType::Long),
		Op::dload_0 | Op::dload_1 | Op::dload_2 | Op::dload_3 => load_wide(state, VType::Double),
		Op::aload_0 | Op::aload_1 | Op::aload_2 | Op::aload_3 => {
			let value = state.local(code[pc] as usize - Op::aload_0 as usize);
			state.stack.push(value);
		}
		Op::iaload | Op::baload | Op::caload | Op::saload => {
			state.pop_slots(2)?;
			state.stack.push(VType::Int);
		}
		Op::faload => {
			state.pop_slots(2)?;
			state.stack.push(VType::Float);
		}
		Op::laload => {
			state.pop_slots(2)?;
			state.stack.push(VType::Long);
			state.stack.push(VType::Top);
		}
		Op::daload => {
			state.pop_slots(2)?;
			state.stack.push(VType::Double);
			state.stack.push(VType::Top);
		}
		Op::aaload => {
			state.pop1()?;
			let array = state.pop1()?;
			let element = match &array {
				VType::Object(name) if name.starts_with('[') => array_element(name),
				VType::Null => VType::Null,
				_ => VType::object("java/lang/Object"),
			};
			if element.is_wide() {
				state.stack.push(element);
				state.stack.push(VType::Top);
			} else {
				state.stack.push(element);
			}
		}
		Op::istore => store(state, operands.u8()? as usize, VType::Int)?,
		Op::fstore => store(state, operands.u8()? as usize, VType::Float)?,
		Op::lstore => store_wide(state, operands.u8()? as usize, VType::Long)?,
		Op::dstore => store_wide(state, operands.u8()? as usize, VType::Double)?,
		Op::astore => {
			let value = state.pop1()?;
			state.set_local(operands.u8()? as usize, value);
		}
		Op::istore_0 | Op::istore_1 | Op::istore_2 | Op::istore_3 => {
			store(state, code[pc] as usize - Op::istore_0 as usize, VType::Int)?;
		}
		Op::fstore_0 | Op::fstore_1 | Op::fstore_2 | Op::fstore_3 => {
			store(state, code[pc] as usize - Op::fstore_0 as usize, VType::Float)?;
		}
		Op::lstore_0 | Op::lstore_1 | Op::lstore_2 | Op::lstore_3 => {
			store_wide(state, code[pc] as usize - Op::lstore_0 as usize, VType::Long)?;
		}
		Op::dstore_0 | Op::dstore_1 | Op::dstore_2 | Op::dstore_3 => {
			store_wide(state, code[pc] as usize - Op::dstore_0 as usize, VType::Double)?;
		}
		Op::astore_0 | Op::astore_1 | Op::astore_2 | Op::astore_3 => {
			let value = state.pop1()?;
			state.set_local(code[pc] as usize - Op::astore_0 as usize, value);
		}
		Op::iastore | Op::fastore | Op::aastore | Op::bastore | Op::castore | Op::sastore => {
			state.pop_slots(3)?;
		}
		Op::lastore | Op::dastore => state.pop_slots(4)?,
		Op::pop => state.pop_slots(1)?,
		Op::pop2 => state.pop_slots(2)?,
		Op::dup => {
			let top = state.stack.last().cloned().ok_or_else(underflow)?;
			state.stack.push(top);
		}
		Op::dup_x1 => {
			let top = state.pop1()?;
			let under = state.pop1()?;
			state.stack.extend([top.clone(), under, top]);
		}
		Op::dup_x2 => {
			let top = state.pop1()?;
			let b = state.pop1()?;
			let c = state.pop1()?;
			state.stack.extend([top.clone(), c, b, top]);
		}
		Op::dup2 => {
			let len = state.stack.len();
			if len < 2 {
				return Err(underflow());
			}
			let pair = state.stack[len - 2..].to_vec();
			state.stack.extend(pair);
		}
		Op::dup2_x1 => {
			let b = state.pop1()?;
			let a = state.pop1()?;
			let c = state.pop1()?;
			state.stack.extend([a.clone(), b.clone(), c, a, b]);
		}
		Op::dup2_x2 => {
			let b = state.pop1()?;
			let a = state.pop1()?;
			let d = state.pop1()?;
			let c = state.pop1()?;
			state.stack.extend([a.clone(), b.clone(), c, d, a, b]);
		}
		Op::swap => {
			let len = state.stack.len();
			if len < 2 {
				return Err(underflow());
			}
			state.stack.swap(len - 1, len - 2);
		}
		Op::iadd | Op::isub | Op::imul | Op::idiv | Op::irem | Op::ishl | Op::ishr | Op::iushr
		| Op::iand | Op::ior | Op::ixor => {
			state.pop_slots(2)?;
			state.stack.push(VType::Int);
		}
		Op::ladd | Op::lsub | Op::lmul | Op::ldiv | Op::lrem | Op::land | Op::lor | Op::lxor => {
			state.pop_slots(4)?;
			state.stack.push(VType::Long);
			state.stack.push(VType::Top);
		}
		Op::lshl | Op::lshr | Op::lushr => state.pop_slots(1)?,
		Op::fadd | Op::fsub | Op::fmul | Op::fdiv | Op::frem => {
			state.pop_slots(2)?;
			state.stack.push(VType::Float);
		}
		Op::dadd | Op::dsub | Op::dmul | Op::ddiv | Op::drem => {
			state.pop_slots(4)?;
			state.stack.push(VType::Double);
			state.stack.push(VType::Top);
		}
		Op::ineg | Op::lneg | Op::fneg | Op::dneg | Op::iinc => {}
		Op::i2l => convert(state, 1, VType::Long)?,
		Op::i2d => convert(state, 1, VType::Double)?,
		Op::i2f => convert(state, 1, VType::Float)?,
		Op::i2b | Op::i2c | Op::i2s => {}
		Op::l2i => convert(state, 2, VType::Int)?,
		Op::l2f => convert(state, 2, VType::Float)?,
		Op::l2d => convert(state, 2, VType::Double)?,
		Op::f2i => convert(state, 1, VType::Int)?,
		Op::f2l => convert(state, 1, VType::Long)?,
		Op::f2d => convert(state, 1, VType::Double)?,
		Op::d2i => convert(state, 2, VType::Int)?,
		Op::d2l => convert(state, 2, VType::Long)?,
		Op::d2f => convert(state, 2, VType::Float)?,
		Op::lcmp | Op::dcmpl | Op::dcmpg => {
			state.pop_slots(4)?;
			state.stack.push(VType::Int);
		}
		Op::fcmpl | Op::fcmpg => {
			state.pop_slots(2)?;
			state.stack.push(VType::Int);
		}
		Op::ifeq | Op::ifne | Op::iflt | Op::ifge | Op::ifgt | Op::ifle | Op::ifnull
		| Op::ifnonnull | Op::tableswitch | Op::lookupswitch => state.pop_slots(1)?,
		Op::if_icmpeq | Op::if_icmpne | Op::if_icmplt | Op::if_icmpge | Op::if_icmpgt
		| Op::if_icmple | Op::if_acmpeq | Op::if_acmpne => state.pop_slots(2)?,
		Op::goto | Op::goto_w | Op::ret | Op::r#return => {}
		Op::jsr | Op::jsr_w => state.stack.push(VType::Top),
		Op::ireturn | Op::freturn | Op::areturn | Op::athrow => state.pop_slots(1)?,
		Op::lreturn | Op::dreturn => state.pop_slots(2)?,
		Op::getstatic => {
			let member = pool.member_ref(operands.u16()?)?;
			push_descriptor_type(&mut state.stack, &member.descriptor);
		}
		Op::putstatic => {
			let member = pool.member_ref(operands.u16()?)?;
			state.pop_slots(descriptor_slots(&member.descriptor))?;
		}
		Op::getfield => {
			let member = pool.member_ref(operands.u16()?)?;
			state.pop_slots(1)?;
			push_descriptor_type(&mut state.stack, &member.descriptor);
		}
		Op::putfield => {
			let member = pool.member_ref(operands.u16()?)?;
			state.pop_slots(descriptor_slots(&member.descriptor) + 1)?;
		}
		Op::invokevirtual | Op::invokespecial | Op::invokestatic | Op::invokeinterface => {
			let member = pool.member_ref(operands.u16()?)?;
			let descriptor = MethodDescriptor::parse(&member.descriptor)?;
			state.pop_slots(descriptor.param_slots() as usize)?;
			if op == Op::invokespecial && member.name.as_ref() == "<init>" {
				let receiver = state.pop1()?;
				match &receiver {
					VType::UninitThis => state.initialize(&VType::UninitThis, this_class),
					VType::Uninit(_) => state.initialize(&receiver, &member.class),
					_ => return Err(TransformError::malformed("constructor on initialized value")),
				}
			} else if op != Op::invokestatic {
				state.pop_slots(1)?;
			}
			if let Some(ret) = &descriptor.ret {
				push_descriptor_type(&mut state.stack, ret.text);
			}
		}
		Op::invokedynamic => {
			let mut reader = pool.entry_reader(operands.u16()?)?;
			reader.skip(2)?;
			let (_, descriptor) = pool.name_and_type(reader.u16()?)?;
			let descriptor = MethodDescriptor::parse(&descriptor)?;
			state.pop_slots(descriptor.param_slots() as usize)?;
			if let Some(ret) = &descriptor.ret {
				push_descriptor_type(&mut state.stack, ret.text);
			}
		}
		Op::new => state.stack.push(VType::Uninit(pc as u16)),
		Op::newarray => {
			let name = primitive_array_name(operands.u8()?)?;
			state.pop_slots(1)?;
			state.stack.push(VType::object(name));
		}
		Op::anewarray => {
			let name = pool.class_name(operands.u16()?)?;
			state.pop_slots(1)?;
			let array = if name.starts_with('[') {
				format!("[{name}")
			} else {
				format!("[L{name};")
			};
			state.stack.push(VType::object(&array));
		}
		Op::multianewarray => {
			let name = pool.class_name(operands.u16()?)?.into_owned();
			let dimensions = operands.u8()? as usize;
			state.pop_slots(dimensions)?;
			state.stack.push(VType::object(&name));
		}
		Op::arraylength | Op::instanceof => {
			state.pop_slots(1)?;
			state.stack.push(VType::Int);
		}
		Op::checkcast => {
			let name = pool.class_name(operands.u16()?)?.into_owned();
			state.pop_slots(1)?;
			state.stack.push(VType::object(&name));
		}
		Op::monitorenter | Op::monitorexit => state.pop_slots(1)?,
		Op::wide => {
			let modified = Op::decode(operands.u8()?)?;
			let index = operands.u16()? as usize;
			match modified {
				Op::iload => load(state, index, VType::Int),
				Op::fload => load(state, index, VType::Float),
				Op::lload => load_wide(state, VType::Long),
				Op::dload => load_wide(state, VType::Double),
				Op::aload => {
					let value = state.local(index);
					state.stack.push(value);
				}
				Op::istore => store(state, index, VType::Int)?,
				Op::fstore => store(state, index, VType::Float)?,
				Op::lstore => store_wide(state, index, VType::Long)?,
				Op::dstore => store_wide(state, index, VType::Double)?,
				Op::astore => {
					let value = state.pop1()?;
					state.set_local(index, value);
				}
				Op::iinc | Op::ret => {}
				_ => return Err(TransformError::malformed("invalid wide form")),
			}
		}
	}
	Ok(())
}

fn underflow() -> TransformError {
	TransformError::malformed("operand stack underflow")
}

fn load(state: &mut FrameState, _index: usize, value: VType) {
	state.stack.push(value);
}

fn load_wide(state: &mut FrameState, value: VType) {
	state.stack.push(value);
	state.stack.push(VType::Top);
}

fn store(state: &mut FrameState, index: usize, value: VType) -> Result<()> {
	state.pop_slots(1)?;
	state.set_local(index, value);
	Ok(())
}

fn store_wide(state: &mut FrameState, index: usize, value: VType) -> Result<()> {
	state.pop_slots(2)?;
	state.set_local(index, value);
	Ok(())
}

fn convert(state: &mut FrameState, from_slots: usize, to: VType) -> Result<()> {
	state.pop_slots(from_slots)?;
	let wide = to.is_wide();
	state.stack.push(to);
	if wide {
		state.stack.push(VType::Top);
	}
	Ok(())
}

fn descriptor_slots(descriptor: &str) -> usize {
	match descriptor.as_bytes()[0] {
		b'J' | b'D' => 2,
		_ => 1,
	}
}

// ---- encoding ---------------------------------------------------------

/// Drops the filler slot after each wide type, yielding the written form.
fn collapse(slots: &[VType]) -> Vec<VType> {
	let mut out = Vec::with_capacity(slots.len());
	let mut i = 0;
	while i < slots.len() {
		let slot = slots[i].clone();
		i += if slot.is_wide() { 2 } else { 1 };
		out.push(slot);
	}
	out
}

fn encode_vtype(out: &mut Writer, vtype: &VType, pool: &mut ConstantPool<'_>) -> Result<()> {
	match vtype {
		VType::Top => out.u8(ITEM_TOP),
		VType::Int => out.u8(ITEM_INT),
		VType::Float => out.u8(ITEM_FLOAT),
		VType::Double => out.u8(ITEM_DOUBLE),
		VType::Long => out.u8(ITEM_LONG),
		VType::Null => out.u8(ITEM_NULL),
		VType::UninitThis => out.u8(ITEM_UNINIT_THIS),
		VType::Object(name) => {
			let index = pool.add_class(name)?;
			out.u8(ITEM_OBJECT);
			out.u16(index);
		}
		VType::Uninit(pc) => {
			out.u8(ITEM_UNINIT);
			out.u16(*pc);
		}
	}
	Ok(())
}

fn encode_full(out: &mut Writer, delta: u16, state: &FrameState, pool: &mut ConstantPool<'_>) -> Result<()> {
	let locals = collapse(&state.locals);
	let stack = collapse(&state.stack);
	out.u8(FULL_FRAME);
	out.u16(delta);
	out.u16(locals.len() as u16);
	for vtype in &locals {
		encode_vtype(out, vtype, pool)?;
	}
	out.u16(stack.len() as u16);
	for vtype in &stack {
		encode_vtype(out, vtype, pool)?;
	}
	Ok(())
}

/// Encodes one entry in the most compact legal form relative to `prev`.
fn encode_entry(
	out: &mut Writer,
	delta: u16,
	prev: &FrameState,
	state: &FrameState,
	pool: &mut ConstantPool<'_>,
) -> Result<()> {
	let prev_locals = collapse(&prev.locals);
	let locals = collapse(&state.locals);
	let stack = collapse(&state.stack);

	if locals == prev_locals {
		match stack.len() {
			0 => {
				if delta < 64 {
					out.u8(delta as u8);
				} else {
					out.u8(SAME_EXTENDED);
					out.u16(delta);
				}
				return Ok(());
			}
			1 => {
				if delta < 64 {
					out.u8(64 + delta as u8);
				} else {
					out.u8(247);
					out.u16(delta);
				}
				return encode_vtype(out, &stack[0], pool);
			}
			_ => {}
		}
	}

	if stack.is_empty() {
		if locals.len() > prev_locals.len() {
			let appended = locals.len() - prev_locals.len();
			if appended <= 3 && locals[..prev_locals.len()] == prev_locals[..] {
				out.u8(SAME_EXTENDED + appended as u8);
				out.u16(delta);
				for vtype in &locals[prev_locals.len()..] {
					encode_vtype(out, vtype, pool)?;
				}
				return Ok(());
			}
		} else if locals.len() < prev_locals.len() {
			let chopped = prev_locals.len() - locals.len();
			if chopped <= 3 && prev_locals[..locals.len()] == locals[..] {
				out.u8(SAME_EXTENDED - chopped as u8);
				out.u16(delta);
				return Ok(());
			}
		}
	}

	encode_full(out, delta, state, pool)
}

/// Encodes a table for a freshly synthesized method: entries hold absolute
/// offsets, `initial` is the frame at method entry.
pub(crate) fn encode_table(
	entries: &[(u16, FrameState)],
	initial: &FrameState,
	pool: &mut ConstantPool<'_>,
) -> Result<Vec<u8>> {
	let mut out = Writer::new();
	out.u16(entries.len() as u16);
	let mut prev_state = initial;
	let mut prev_offset: Option<u16> = None;
	for (offset, state) in entries {
		let delta = match prev_offset {
			None => *offset,
			Some(prev) => (*offset as u32)
				.checked_sub(prev as u32 + 1)
				.ok_or(TransformError::Internal("stack-map entries out of order"))?
				as u16,
		};
		encode_entry(&mut out, delta, prev_state, state, pool)?;
		prev_state = state;
		prev_offset = Some(*offset);
	}
	Ok(out.into_vec())
}

/// Copies one verification type, shifting uninitialized pcs.
fn transcribe_vtype(reader: &mut Reader<'_>, out: &mut Writer, shift: u16) -> Result<()> {
	let tag = reader.u8()?;
	out.u8(tag);
	match tag {
		ITEM_OBJECT => out.u16(reader.u16()?),
		ITEM_UNINIT => out.u16(reader.u16()?.saturating_add(shift)),
		_ if tag < ITEM_OBJECT => {}
		_ => return Err(TransformError::malformed("unknown verification type")),
	}
	Ok(())
}

/// Rebuilds a stack-map attribute body after `shift` bytes of code were
/// inserted at pc 0, an optional new merge target appeared at the start of
/// the preserved body, and `appended` merge targets were added at the end
/// of the method. Original entries keep their relative encoding; only the
/// first entry's delta changes, converting to the extended form when it
/// crosses the 64 boundary. Inserted and appended entries are written as
/// full frames, which stay correct regardless of their neighbors.
pub(crate) fn rebuild_table(
	body: Option<&[u8]>,
	shift: u16,
	insert: Option<&(u16, FrameState)>,
	appended: &[(u16, FrameState)],
	pool: &mut ConstantPool<'_>,
) -> Result<Vec<u8>> {
	let mut out = Writer::new();
	let mut count = appended.len() as u16;
	let mut last_offset: Option<u16> = None;

	out.u16(0);

	// An entry already sitting at the insertion offset wins; otherwise the
	// synthesized frame becomes the new first entry.
	let mut insert = insert;
	if let (Some((at, _)), Some(body)) = (insert, body) {
		let mut reader = Reader::new(body);
		if reader.u16()? > 0 {
			let first_delta = match reader.u8()? {
				ft @ 0..=63 => ft as u16,
				ft @ 64..=127 => ft as u16 - 64,
				_ => reader.u16()?,
			};
			if first_delta as u32 + shift as u32 == *at as u32 {
				insert = None;
			}
		}
	}
	if let Some((at, state)) = insert {
		encode_full(&mut out, *at, state, pool)?;
		count += 1;
		last_offset = Some(*at);
	}

	if let Some(body) = body {
		let mut reader = Reader::new(body);
		let original = reader.u16()?;
		count += original;
		let mut absolute = 0u32;
		for entry in 0..original {
			let frame_type = reader.u8()?;
			let first = entry == 0;
			let (delta, vtypes): (u16, u16) = match frame_type {
				0..=63 => (frame_type as u16, 0),
				64..=127 => (frame_type as u16 - 64, 1),
				247 => (reader.u16()?, 1),
				248..=251 => (reader.u16()?, 0),
				252..=254 => (reader.u16()?, frame_type as u16 - 251),
				255 => (reader.u16()?, 0),
				_ => return Err(TransformError::malformed("reserved stack-map frame type")),
			};

			absolute += delta as u32 + if first { shift as u32 } else { 1 };
			let written = if first {
				let shifted = (delta as u32 + shift as u32).min(u16::MAX as u32) as u16;
				match last_offset {
					// Re-anchor behind the inserted entry.
					Some(inserted) => shifted.saturating_sub(inserted).saturating_sub(1),
					None => shifted,
				}
			} else {
				delta
			};

			match frame_type {
				0..=63 => {
					if written < 64 {
						out.u8(written as u8);
					} else {
						out.u8(SAME_EXTENDED);
						out.u16(written);
					}
				}
				64..=127 => {
					if written < 64 {
						out.u8(64 + written as u8);
					} else {
						out.u8(247);
						out.u16(written);
					}
				}
				_ => {
					out.u8(frame_type);
					out.u16(written);
				}
			}

			if frame_type == 255 {
				let locals = reader.u16()?;
				out.u16(locals);
				for _ in 0..locals {
					transcribe_vtype(&mut reader, &mut out, shift)?;
				}
				let stack = reader.u16()?;
				out.u16(stack);
				for _ in 0..stack {
					transcribe_vtype(&mut reader, &mut out, shift)?;
				}
			} else {
				for _ in 0..vtypes {
					transcribe_vtype(&mut reader, &mut out, shift)?;
				}
			}

			last_offset = Some(absolute.min(u16::MAX as u32) as u16);
		}
	}

	for (offset, state) in appended {
		let delta = match last_offset {
			None => *offset,
			Some(prev) => (*offset as u32)
				.checked_sub(prev as u32 + 1)
				.ok_or(TransformError::Internal("stack-map entries out of order"))?
				as u16,
		};
		encode_full(&mut out, delta, state, pool)?;
		last_offset = Some(*offset);
	}

	out.patch_u16_at(0, count);
	Ok(out.into_vec())
}
