use crate::errors::{Result, TransformError};
use crate::raw::descriptor::{box_class, primitive_type_holder, unbox_method, MethodDescriptor, ParamType, TypeKind};
use crate::raw::flags::MethodFlags;
use crate::raw::opcodes::OpCode;
use crate::raw::pool::{
	constructor_proxy_descriptor, instance_proxy_descriptor, ConstantPool, HandleKind, MemberRef,
};
use crate::rules::{ConstValue, DenyAction, HandleInfo};
use crate::transform::frames::{self, FrameState};
use crate::transform::runtime;
use crate::utilities::Writer;

/// Pending forward branch: operand position plus the pc of the opcode.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Branch {
	operand_at: usize,
	pc: usize,
	op: OpCode,
}

/// A resolved branch whose target needs a stack-map entry.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Mark {
	pub pc: usize,
	pub target: usize,
	pub op: OpCode,
}

/// Bytecode emitter with operand-stack and local-slot accounting. `base` is
/// the absolute pc of the first emitted byte, so generators producing a
/// block in the middle of a larger method patch branches in absolute terms.
pub(crate) struct CodeGen {
	code: Writer,
	base: usize,
	stack: u16,
	max_stack: u16,
	max_locals: u16,
	marks: Vec<Mark>,
}

impl CodeGen {
	pub fn new(base: usize, max_locals: u16) -> Self {
		Self { code: Writer::new(), base, stack: 0, max_stack: 0, max_locals, marks: Vec::new() }
	}

	pub fn pc(&self) -> usize {
		self.base + self.code.len()
	}

	pub fn len(&self) -> usize {
		self.code.len()
	}

	pub fn max_stack(&self) -> u16 {
		self.max_stack
	}

	pub fn max_locals(&self) -> u16 {
		self.max_locals
	}

	pub fn marks(&self) -> &[Mark] {
		&self.marks
	}

	pub fn into_code(self) -> Vec<u8> {
		self.code.into_vec()
	}

	pub fn code_slice(&self) -> &[u8] {
		self.code.as_slice()
	}

	pub fn alloc_local(&mut self, slots: u16) -> u16 {
		let slot = self.max_locals;
		self.max_locals += slots;
		slot
	}

	fn adjust(&mut self, delta: i32) {
		self.stack = (self.stack as i32 + delta).max(0) as u16;
		self.max_stack = self.max_stack.max(self.stack);
	}

	pub fn op(&mut self, op: OpCode, delta: i32) {
		self.code.u8(op as u8);
		self.adjust(delta);
	}

	fn raw_op(&mut self, byte: u8, delta: i32) {
		self.code.u8(byte);
		self.adjust(delta);
	}

	pub fn op_u8(&mut self, op: OpCode, operand: u8, delta: i32) {
		self.code.u8(op as u8);
		self.code.u8(operand);
		self.adjust(delta);
	}

	pub fn op_u16(&mut self, op: OpCode, operand: u16, delta: i32) {
		self.code.u8(op as u8);
		self.code.u16(operand);
		self.adjust(delta);
	}

	/// Loadable single-slot constant; picks `ldc` or `ldc_w` by index width.
	pub fn ldc(&mut self, index: u16) {
		if index <= u8::MAX as u16 {
			self.op_u8(OpCode::ldc, index as u8, 1);
		} else {
			self.op_u16(OpCode::ldc_w, index, 1);
		}
	}

	pub fn ldc2(&mut self, index: u16) {
		self.op_u16(OpCode::ldc2_w, index, 2);
	}

	/// Narrowest legal push of an int constant.
	pub fn const_int(&mut self, pool: &mut ConstantPool<'_>, value: i32) -> Result<()> {
		match value {
			-1..=5 => self.raw_op((OpCode::iconst_0 as i32 + value) as u8, 1),
			-128..=127 => self.op_u8(OpCode::bipush, value as i8 as u8, 1),
			-32768..=32767 => self.op_u16(OpCode::sipush, value as i16 as u16, 1),
			_ => {
				let index = pool.add_integer(value)?;
				self.ldc(index);
			}
		}
		Ok(())
	}

	pub fn const_long(&mut self, pool: &mut ConstantPool<'_>, value: i64) -> Result<()> {
		match value {
			0 => self.op(OpCode::lconst_0, 2),
			1 => self.op(OpCode::lconst_1, 2),
			_ => {
				let index = pool.add_long(value)?;
				self.ldc2(index);
			}
		}
		Ok(())
	}

	pub fn const_float(&mut self, pool: &mut ConstantPool<'_>, value: f32) -> Result<()> {
		if value == 0.0 && value.is_sign_positive() {
			self.op(OpCode::fconst_0, 1);
		} else if value == 1.0 {
			self.op(OpCode::fconst_1, 1);
		} else if value == 2.0 {
			self.op(OpCode::fconst_2, 1);
		} else {
			let index = pool.add_float(value)?;
			self.ldc(index);
		}
		Ok(())
	}

	pub fn const_double(&mut self, pool: &mut ConstantPool<'_>, value: f64) -> Result<()> {
		if value == 0.0 && value.is_sign_positive() {
			self.op(OpCode::dconst_0, 2);
		} else if value == 1.0 {
			self.op(OpCode::dconst_1, 2);
		} else {
			let index = pool.add_double(value)?;
			self.ldc2(index);
		}
		Ok(())
	}

	/// Narrowest load of a local slot.
	pub fn load(&mut self, kind: TypeKind, slot: u16) {
		let (short_base, single) = match kind {
			TypeKind::Int => (OpCode::iload_0, OpCode::iload),
			TypeKind::Long => (OpCode::lload_0, OpCode::lload),
			TypeKind::Float => (OpCode::fload_0, OpCode::fload),
			TypeKind::Double => (OpCode::dload_0, OpCode::dload),
			TypeKind::Reference => (OpCode::aload_0, OpCode::aload),
		};
		let delta = kind.slots() as i32;
		if slot <= 3 {
			self.raw_op(short_base as u8 + slot as u8, delta);
		} else if slot <= u8::MAX as u16 {
			self.op_u8(single, slot as u8, delta);
		} else {
			self.code.u8(OpCode::wide as u8);
			self.code.u8(single as u8);
			self.code.u16(slot);
			self.adjust(delta);
		}
	}

	pub fn store_ref(&mut self, slot: u16) {
		if slot <= 3 {
			self.raw_op(OpCode::astore_0 as u8 + slot as u8, -1);
		} else if slot <= u8::MAX as u16 {
			self.op_u8(OpCode::astore, slot as u8, -1);
		} else {
			self.code.u8(OpCode::wide as u8);
			self.code.u8(OpCode::astore as u8);
			self.code.u16(slot);
			self.adjust(-1);
		}
	}

	pub fn load_ref(&mut self, slot: u16) {
		self.load(TypeKind::Reference, slot);
	}

	/// Return matching the enclosing method's return type.
	pub fn ret(&mut self, return_type: Option<&ParamType<'_>>) {
		match return_type.map(|r| r.kind) {
			None => self.op(OpCode::r#return, 0),
			Some(TypeKind::Int) => self.op(OpCode::ireturn, -1),
			Some(TypeKind::Long) => self.op(OpCode::lreturn, -2),
			Some(TypeKind::Float) => self.op(OpCode::freturn, -1),
			Some(TypeKind::Double) => self.op(OpCode::dreturn, -2),
			Some(TypeKind::Reference) => self.op(OpCode::areturn, -1),
		}
	}

	fn branch_delta(op: OpCode) -> i32 {
		match op {
			OpCode::ifeq | OpCode::ifne | OpCode::ifnull | OpCode::ifnonnull => -1,
			OpCode::if_acmpeq | OpCode::if_acmpne => -2,
			_ => 0,
		}
	}

	/// Emits a branch with a placeholder offset to patch later.
	pub fn branch(&mut self, op: OpCode) -> Branch {
		let pc = self.pc();
		self.code.u8(op as u8);
		let operand_at = self.code.len();
		self.code.u16(0);
		self.adjust(Self::branch_delta(op));
		Branch { operand_at, pc, op }
	}

	/// Emits a branch straight to a known (possibly backward) absolute pc.
	pub fn branch_to(&mut self, op: OpCode, target: usize) -> Result<()> {
		let pc = self.pc();
		let offset = target as i64 - pc as i64;
		if offset < i16::MIN as i64 || offset > i16::MAX as i64 {
			return Err(TransformError::ClassTooLarge("branch offset"));
		}
		self.code.u8(op as u8);
		self.code.u16(offset as i16 as u16);
		self.adjust(Self::branch_delta(op));
		self.marks.push(Mark { pc, target, op });
		Ok(())
	}

	/// Resolves a pending branch to the current pc.
	pub fn patch(&mut self, branch: Branch) -> Result<()> {
		let target = self.pc();
		self.patch_to(branch, target)
	}

	/// Resolves a pending branch to an absolute pc, possibly outside this
	/// generator's own block.
	pub fn patch_to(&mut self, branch: Branch, target: usize) -> Result<()> {
		let offset = target as i64 - branch.pc as i64;
		if offset < i16::MIN as i64 || offset > i16::MAX as i64 {
			return Err(TransformError::ClassTooLarge("branch offset"));
		}
		self.code.patch_u16_at(branch.operand_at, offset as i16 as u16);
		self.marks.push(Mark { pc: branch.pc, target, op: branch.op });
		Ok(())
	}

	pub fn invoke(&mut self, op: OpCode, member: u16, pops: u16, pushes: u16) {
		self.code.u8(op as u8);
		self.code.u16(member);
		if op == OpCode::invokeinterface {
			self.code.u8(pops as u8);
			self.code.u8(0);
		}
		self.adjust(pushes as i32 - pops as i32);
	}

	pub fn getstatic(&mut self, member: u16, pushes: u16) {
		self.op_u16(OpCode::getstatic, member, pushes as i32);
	}
}

/// How the emitted denial code obtains the caller class.
#[derive(Debug, Copy, Clone)]
pub(crate) enum CallerSource {
	/// Stored to a local by the check prelude.
	Slot(u16),
	/// The proxy's own class stands in for the caller module.
	OwnClass,
	Null,
}

/// Where control continues when a gated or checked action decides the
/// operation is allowed after all.
pub(crate) enum Allowed {
	/// Jump back to an absolute pc (the original body behind a prelude).
	Backward(usize),
	/// Collect branches to patch onto a forward label.
	Forward(Vec<Branch>),
}

/// Everything the denial encoder needs to know about the denied operation.
pub(crate) struct DenyContext<'a> {
	/// Class constant of the class being rewritten.
	pub this_class_index: u16,
	pub target_class: &'a str,
	/// `None` for constructors.
	pub method_name: Option<&'a str>,
	pub descriptor: &'a str,
	/// Return type of the enclosing method or proxy.
	pub return_type: Option<ParamType<'a>>,
	/// Argument list as (type, local slot); includes the receiver exactly
	/// when the denied operation is not a constructor.
	pub args: Vec<(ParamType<'a>, u16)>,
	pub caller: CallerSource,
}

fn load_caller(gen: &mut CodeGen, ctx: &DenyContext<'_>) {
	match ctx.caller {
		CallerSource::Slot(slot) => gen.load_ref(slot),
		CallerSource::OwnClass => gen.ldc(ctx.this_class_index),
		CallerSource::Null => gen.op(OpCode::aconst_null, 1),
	}
}

/// Emits the caller fetch plus the helper check invocation. Returns the
/// branch taken when the check reports a denial (`None` for the standard
/// action, which throws from inside the helper).
pub(crate) fn emit_check(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	ctx: &DenyContext<'_>,
	action: &DenyAction,
) -> Result<Option<Branch>> {
	let walker = pool.add_field_ref(runtime::GATE_CLASS, runtime::WALKER_FIELD.0, runtime::WALKER_FIELD.1)?;
	let caller_class = pool.add_method_ref(
		runtime::STACK_WALKER_CLASS,
		runtime::GET_CALLER_CLASS.0,
		runtime::GET_CALLER_CLASS.1,
	)?;

	gen.getstatic(walker, 1);
	gen.invoke(OpCode::invokevirtual, caller_class, 1, 1);
	if let CallerSource::Slot(slot) = ctx.caller {
		gen.store_ref(slot);
		gen.load_ref(slot);
	}

	let target = pool.add_class(ctx.target_class)?;
	gen.ldc(target);
	match ctx.method_name {
		Some(name) => {
			let name = pool.add_string(name)?;
			gen.ldc(name);
		}
		None => gen.op(OpCode::aconst_null, 1),
	}
	let descriptor = pool.add_string(ctx.descriptor)?;
	gen.ldc(descriptor);

	if action.uses_try_check() {
		let try_check = pool.add_method_ref(runtime::GATE_CLASS, runtime::TRY_CHECK.0, runtime::TRY_CHECK.1)?;
		gen.invoke(OpCode::invokestatic, try_check, 4, 1);
		Ok(Some(gen.branch(OpCode::ifeq)))
	} else {
		let check = pool.add_method_ref(runtime::GATE_CLASS, runtime::CHECK.0, runtime::CHECK.1)?;
		gen.invoke(OpCode::invokestatic, check, 4, 0);
		Ok(None)
	}
}

fn emit_throw(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	class: &str,
	message: Option<&str>,
) -> Result<()> {
	let class_index = pool.add_class(class)?;
	gen.op_u16(OpCode::new, class_index, 1);
	gen.op(OpCode::dup, 1);
	let ctor = if let Some(message) = message {
		let string = pool.add_string(message)?;
		gen.ldc(string);
		pool.add_method_ref(class, "<init>", "(Ljava/lang/String;)V")?
	} else {
		pool.add_method_ref(class, "<init>", "()V")?
	};
	let pops = if message.is_some() { 2 } else { 1 };
	gen.invoke(OpCode::invokespecial, ctor, pops, 0);
	gen.op(OpCode::athrow, -1);
	Ok(())
}

fn emit_box(gen: &mut CodeGen, pool: &mut ConstantPool<'_>, base: u8) -> Result<()> {
	if let Some((class, descriptor)) = box_class(base) {
		let value_of = pool.add_method_ref(class, "valueOf", descriptor)?;
		let pops = if matches!(base, b'J' | b'D') { 2 } else { 1 };
		gen.invoke(OpCode::invokestatic, value_of, pops, 1);
	}
	Ok(())
}

/// Casts and unboxes the object on top of the stack into the given return
/// type, then returns it.
fn emit_coerced_return(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	return_type: Option<&ParamType<'_>>,
) -> Result<()> {
	let Some(ret) = return_type else {
		gen.op(OpCode::pop, -1);
		gen.ret(None);
		return Ok(());
	};
	match ret.kind {
		TypeKind::Reference => {
			let class = pool.add_class(ret.class_name())?;
			gen.op_u16(OpCode::checkcast, class, 0);
		}
		_ => {
			let (class, name, descriptor) = unbox_method(ret.base())
				.ok_or(TransformError::Internal("primitive return without unbox"))?;
			let cast = pool.add_class(class)?;
			gen.op_u16(OpCode::checkcast, cast, 0);
			let accessor = pool.add_method_ref(class, name, descriptor)?;
			gen.invoke(OpCode::invokevirtual, accessor, 1, ret.kind.slots());
		}
	}
	gen.ret(return_type);
	Ok(())
}

fn emit_value_return(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	value: &ConstValue,
	return_type: Option<&ParamType<'_>>,
) -> Result<()> {
	let Some(ret) = return_type else {
		gen.ret(None);
		return Ok(());
	};
	match (ret.kind, value) {
		(TypeKind::Int, ConstValue::Int(v)) => gen.const_int(pool, *v)?,
		(TypeKind::Int, ConstValue::Long(v)) => gen.const_int(pool, *v as i32)?,
		(TypeKind::Long, ConstValue::Long(v)) => gen.const_long(pool, *v)?,
		(TypeKind::Long, ConstValue::Int(v)) => gen.const_long(pool, *v as i64)?,
		(TypeKind::Float, ConstValue::Float(v)) => gen.const_float(pool, *v)?,
		(TypeKind::Float, ConstValue::Int(v)) => gen.const_float(pool, *v as f32)?,
		(TypeKind::Double, ConstValue::Double(v)) => gen.const_double(pool, *v)?,
		(TypeKind::Double, ConstValue::Float(v)) => gen.const_double(pool, *v as f64)?,
		(TypeKind::Double, ConstValue::Int(v)) => gen.const_double(pool, *v as f64)?,
		(TypeKind::Reference, ConstValue::Str(text))
			if runtime::STRING_SUPERTYPES.contains(&ret.class_name()) =>
		{
			let string = pool.add_string(text)?;
			gen.ldc(string);
		}
		(TypeKind::Reference, _) => gen.op(OpCode::aconst_null, 1),
		(TypeKind::Long, _) => gen.const_long(pool, 0)?,
		(TypeKind::Float, _) => gen.const_float(pool, 0.0)?,
		(TypeKind::Double, _) => gen.const_double(pool, 0.0)?,
		_ => gen.const_int(pool, 0)?,
	}
	gen.ret(return_type);
	Ok(())
}

fn emit_empty_return(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	return_type: Option<&ParamType<'_>>,
) -> Result<()> {
	let Some(ret) = return_type else {
		gen.ret(None);
		return Ok(());
	};
	match ret.kind {
		TypeKind::Int => gen.op(OpCode::iconst_0, 1),
		TypeKind::Long => gen.op(OpCode::lconst_0, 2),
		TypeKind::Float => gen.op(OpCode::fconst_0, 1),
		TypeKind::Double => gen.op(OpCode::dconst_0, 2),
		TypeKind::Reference if ret.is_array() => {
			gen.op(OpCode::iconst_0, 1);
			emit_array_new(gen, pool, ret.text)?;
		}
		TypeKind::Reference => {
			let name = ret.class_name();
			if name == runtime::STRING_CLASS {
				let empty = pool.add_string("")?;
				gen.ldc(empty);
			} else if let Some((factory, descriptor)) = runtime::empty_factory(name) {
				let factory = pool.add_method_ref(runtime::GATE_CLASS, factory, descriptor)?;
				gen.invoke(OpCode::invokestatic, factory, 0, 1);
			} else {
				// No registered producer: construct a fresh instance. May
				// fail at link time if the type has no no-arg constructor.
				let class = pool.add_class(name)?;
				gen.op_u16(OpCode::new, class, 1);
				gen.op(OpCode::dup, 1);
				let ctor = pool.add_method_ref(name, "<init>", "()V")?;
				gen.invoke(OpCode::invokespecial, ctor, 1, 0);
			}
		}
	}
	gen.ret(return_type);
	Ok(())
}

/// Zero-length array of the element type of `descriptor` (one dimension
/// stripped); the length on the stack is consumed.
fn emit_array_new(gen: &mut CodeGen, pool: &mut ConstantPool<'_>, descriptor: &str) -> Result<()> {
	let element = &descriptor[1..];
	match element.as_bytes()[0] {
		b'L' => {
			let class = pool.add_class(&element[1..element.len() - 1])?;
			gen.op_u16(OpCode::anewarray, class, 0);
		}
		b'[' => {
			let class = pool.add_class(element)?;
			gen.op_u16(OpCode::anewarray, class, 0);
		}
		base => {
			let atype = match base {
				b'Z' => 4,
				b'C' => 5,
				b'F' => 6,
				b'D' => 7,
				b'B' => 8,
				b'S' => 9,
				b'I' => 10,
				b'J' => 11,
				_ => return Err(TransformError::malformed("invalid array descriptor")),
			};
			gen.op_u8(OpCode::newarray, atype, 0);
		}
	}
	Ok(())
}

/// Invokes a user handler or predicate through its method-handle constant,
/// loading the caller first when the handler declares a leading class
/// parameter, then the operation's arguments. Returns the stack slots the
/// handler's result occupies.
fn emit_handle_invocation(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	handle: &HandleInfo,
	ctx: &DenyContext<'_>,
) -> Result<u16> {
	let member = match handle.kind {
		HandleKind::InvokeInterface => {
			pool.add_interface_method_ref(&handle.class, &handle.name, &handle.descriptor)?
		}
		_ => pool.add_method_ref(&handle.class, &handle.name, &handle.descriptor)?,
	};
	let constant = pool.add_method_handle(handle.kind, member)?;
	gen.ldc(constant);

	let mut pops = 1u16;
	if handle.takes_caller() {
		load_caller(gen, ctx);
		pops += 1;
	}
	for (param, slot) in &ctx.args {
		gen.load(param.kind, *slot);
		pops += param.kind.slots();
	}

	let descriptor = MethodDescriptor::parse(&handle.descriptor)?;
	let pushes = descriptor.ret.as_ref().map_or(0, |r| r.kind.slots());
	let invoke = pool.add_method_ref(runtime::METHOD_HANDLE_CLASS, "invoke", &handle.descriptor)?;
	gen.invoke(OpCode::invokevirtual, invoke, pops, pushes);
	Ok(pushes)
}

/// Builds the args payload for the dynamic dispatcher: null for none, the
/// boxed parameter for one, a fresh object array otherwise. Returns the
/// local holding the array when one was allocated and retention was asked.
fn emit_args_payload(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	ctx: &DenyContext<'_>,
	retain_array: bool,
) -> Result<Option<u16>> {
	match ctx.args.len() {
		0 => {
			gen.op(OpCode::aconst_null, 1);
			Ok(None)
		}
		1 => {
			let (param, slot) = &ctx.args[0];
			gen.load(param.kind, *slot);
			if param.kind != TypeKind::Reference {
				emit_box(gen, pool, param.base())?;
			}
			Ok(None)
		}
		count => {
			let object = pool.add_class(runtime::OBJECT_CLASS)?;
			gen.const_int(pool, count as i32)?;
			gen.op_u16(OpCode::anewarray, object, 0);
			for (position, (param, slot)) in ctx.args.iter().enumerate() {
				gen.op(OpCode::dup, 1);
				gen.const_int(pool, position as i32)?;
				gen.load(param.kind, *slot);
				if param.kind != TypeKind::Reference {
					emit_box(gen, pool, param.base())?;
				}
				gen.op(OpCode::aastore, -3);
			}
			if retain_array {
				let slot = gen.alloc_local(1);
				gen.op(OpCode::dup, 1);
				gen.store_ref(slot);
				return Ok(Some(slot));
			}
			Ok(None)
		}
	}
}

fn emit_dynamic(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	ctx: &DenyContext<'_>,
	checked: bool,
	allowed: &mut Allowed,
) -> Result<()> {
	load_caller(gen, ctx);
	let target = pool.add_class(ctx.target_class)?;
	gen.ldc(target);
	match ctx.method_name {
		Some(name) => {
			let name = pool.add_string(name)?;
			gen.ldc(name);
		}
		None => gen.op(OpCode::aconst_null, 1),
	}
	let descriptor = pool.add_string(ctx.descriptor)?;
	gen.ldc(descriptor);

	// Boxed return type: a class constant for references, the TYPE field
	// of the box class for primitives and void.
	match &ctx.return_type {
		Some(ret) if ret.kind == TypeKind::Reference => {
			let class = pool.add_class(ret.class_name())?;
			gen.ldc(class);
		}
		other => {
			let base = other.as_ref().map_or(b'V', ParamType::base);
			let holder = primitive_type_holder(base)
				.ok_or(TransformError::Internal("primitive without TYPE holder"))?;
			let field = pool.add_field_ref(holder, "TYPE", "Ljava/lang/Class;")?;
			gen.getstatic(field, 1);
		}
	}

	let array_slot = emit_args_payload(gen, pool, ctx, checked)?;
	let apply = pool.add_method_ref(
		runtime::GATE_CLASS,
		runtime::APPLY_DENY_ACTION.0,
		runtime::APPLY_DENY_ACTION.1,
	)?;
	gen.invoke(OpCode::invokestatic, apply, 6, 1);

	// Identity with the args array signals "allowed": drop the result and
	// resume the operation. Only meaningful when an array was built.
	if let Some(slot) = array_slot {
		gen.op(OpCode::dup, 1);
		gen.load_ref(slot);
		let denied = gen.branch(OpCode::if_acmpne);
		gen.op(OpCode::pop, -1);
		match allowed {
			Allowed::Backward(target) => gen.branch_to(OpCode::goto, *target)?,
			Allowed::Forward(branches) => branches.push(gen.branch(OpCode::goto)),
		}
		gen.patch(denied)?;
		// Denied path continues with the result on the stack.
		gen.adjust(1);
	}
	emit_coerced_return(gen, pool, ctx.return_type.as_ref())
}

/// Emits the denial outcome. The generated code never falls through: it
/// throws, returns a substitute, or branches to the allowed continuation.
pub(crate) fn emit_deny_action(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	action: &DenyAction,
	ctx: &DenyContext<'_>,
	allowed: &mut Allowed,
) -> Result<()> {
	match action {
		DenyAction::Exception => emit_throw(gen, pool, runtime::SECURITY_EXCEPTION_CLASS, None),
		DenyAction::ExceptionClass { class } => emit_throw(gen, pool, class, None),
		DenyAction::ExceptionMessage { class, message } => emit_throw(gen, pool, class, Some(message)),
		DenyAction::Value(value) => emit_value_return(gen, pool, value, ctx.return_type.as_ref()),
		DenyAction::Empty => emit_empty_return(gen, pool, ctx.return_type.as_ref()),
		DenyAction::Custom { handler } => {
			let pushed = emit_handle_invocation(gen, pool, handler, ctx)?;
			match &ctx.return_type {
				Some(_) if pushed == 0 => {
					Err(TransformError::Internal("void handler for valued operation"))
				}
				Some(_) => {
					gen.ret(ctx.return_type.as_ref());
					Ok(())
				}
				None => {
					// A handler result the void operation cannot use is
					// dropped before returning.
					match pushed {
						0 => {}
						1 => gen.op(OpCode::pop, -1),
						_ => gen.op(OpCode::pop2, -2),
					}
					gen.ret(None);
					Ok(())
				}
			}
		}
		DenyAction::Checked { predicate, action } => {
			if matches!(action.as_ref(), DenyAction::Checked { .. }) {
				return Err(TransformError::Internal("nested predicate-gated action"));
			}
			emit_handle_invocation(gen, pool, predicate, ctx)?;
			match allowed {
				Allowed::Backward(target) => gen.branch_to(OpCode::ifne, *target)?,
				Allowed::Forward(branches) => branches.push(gen.branch(OpCode::ifne)),
			}
			emit_deny_action(gen, pool, action, ctx, allowed)
		}
		DenyAction::Dynamic { checked } => emit_dynamic(gen, pool, ctx, *checked, allowed),
	}
}

// ---- synthesized methods ----------------------------------------------

/// Append buffer of synthesized methods, flushed after the original method
/// table during assembly.
#[derive(Default)]
pub(crate) struct MethodBuffer {
	bytes: Writer,
	count: u16,
}

impl MethodBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn count(&self) -> u16 {
		self.count
	}

	pub fn is_empty(&self) -> bool {
		self.count == 0
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.bytes.into_vec()
	}

	/// Emits a complete method_info. Length, max-stack and max-locals
	/// fields are written as placeholders and patched once known.
	pub fn append(
		&mut self,
		pool: &mut ConstantPool<'_>,
		flags: MethodFlags,
		name_index: u16,
		descriptor_index: u16,
		gen: CodeGen,
		initial: &FrameState,
		this_class_name: &str,
	) -> Result<()> {
		let frames = branch_target_frames(&gen, initial, pool, this_class_name, 0)?;
		let table = if frames.is_empty() {
			None
		} else {
			Some(frames::encode_table(&frames, initial, pool)?)
		};

		let code_name = pool.add_utf8("Code")?;
		let max_stack = gen.max_stack();
		let max_locals = gen.max_locals();
		let code = gen.into_code();
		if code.len() > u16::MAX as usize {
			return Err(TransformError::ClassTooLarge("synthesized method body"));
		}

		self.bytes.u16(flags.bits());
		self.bytes.u16(name_index);
		self.bytes.u16(descriptor_index);
		self.bytes.u16(1);

		self.bytes.u16(code_name);
		let length_at = self.bytes.len();
		self.bytes.u32(0);
		let body_start = self.bytes.len();

		let max_stack_at = self.bytes.len();
		self.bytes.u16(0);
		self.bytes.u16(0);
		let code_length_at = self.bytes.len();
		self.bytes.u32(0);
		self.bytes.bytes(&code);
		self.bytes.u16(0);
		match table {
			None => self.bytes.u16(0),
			Some(table) => {
				let name = pool.add_utf8("StackMapTable")?;
				self.bytes.u16(1);
				self.bytes.u16(name);
				self.bytes.u32(table.len() as u32);
				self.bytes.bytes(&table);
			}
		}

		// Back-fill the fields whose values depended on the emitted body.
		let length = self.bytes.len() - body_start;
		self.bytes.patch_u32_at(length_at, length as u32);
		self.bytes.patch_u16_at(max_stack_at, max_stack);
		self.bytes.patch_u16_at(max_stack_at + 2, max_locals);
		self.bytes.patch_u32_at(code_length_at, code.len() as u32);
		self.count += 1;
		Ok(())
	}
}

/// Class being rewritten, as the proxy synthesizer needs it.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ClassContext<'a> {
	pub name: &'a str,
	/// Index of the this-class constant.
	pub index: u16,
}

/// The denied operation a proxy stands in for.
pub(crate) struct ProxySpec {
	pub member_index: u16,
	pub member: MemberRef,
	pub kind: HandleKind,
}

impl ProxySpec {
	pub fn invocation_kind(op: OpCode, interface: bool) -> Option<HandleKind> {
		Some(match op {
			OpCode::invokevirtual => HandleKind::InvokeVirtual,
			OpCode::invokespecial if interface => HandleKind::InvokeInterface,
			OpCode::invokespecial => HandleKind::InvokeSpecial,
			OpCode::invokestatic => HandleKind::InvokeStatic,
			OpCode::invokeinterface => HandleKind::InvokeInterface,
			_ => return None,
		})
	}

	fn descriptor(&self) -> Result<String> {
		match self.kind {
			HandleKind::InvokeStatic => Ok(self.member.descriptor.to_string()),
			HandleKind::NewInvokeSpecial => {
				constructor_proxy_descriptor(&self.member.class, &self.member.descriptor)
			}
			_ => instance_proxy_descriptor(&self.member.class, &self.member.descriptor),
		}
	}

	fn is_constructor(&self) -> bool {
		self.kind == HandleKind::NewInvokeSpecial
	}
}

/// Loads every proxy parameter and performs the original operation.
fn emit_forward(
	gen: &mut CodeGen,
	pool: &mut ConstantPool<'_>,
	spec: &ProxySpec,
	descriptor: &MethodDescriptor<'_>,
) -> Result<()> {
	let param_slots = descriptor.param_slots();
	let ret_slots = descriptor.ret.as_ref().map_or(0, |r| r.kind.slots());

	if spec.is_constructor() {
		let class = pool.add_class(&spec.member.class)?;
		gen.op_u16(OpCode::new, class, 1);
		gen.op(OpCode::dup, 1);
	}

	let mut slot = 0u16;
	for param in &descriptor.params {
		gen.load(param.kind, slot);
		slot += param.kind.slots();
	}

	match spec.kind {
		HandleKind::InvokeVirtual => {
			gen.invoke(OpCode::invokevirtual, spec.member_index, param_slots, ret_slots);
		}
		HandleKind::InvokeStatic => {
			gen.invoke(OpCode::invokestatic, spec.member_index, param_slots, ret_slots);
		}
		HandleKind::InvokeSpecial => {
			gen.invoke(OpCode::invokespecial, spec.member_index, param_slots, ret_slots);
		}
		HandleKind::InvokeInterface => {
			gen.invoke(OpCode::invokeinterface, spec.member_index, param_slots, ret_slots);
		}
		HandleKind::NewInvokeSpecial => {
			gen.invoke(OpCode::invokespecial, spec.member_index, param_slots + 1, 0);
		}
		_ => return Err(TransformError::Internal("field handle routed to invocation proxy")),
	}
	gen.ret(descriptor.ret.as_ref());
	Ok(())
}

fn proxy_args<'a>(descriptor: &MethodDescriptor<'a>) -> Vec<(ParamType<'a>, u16)> {
	let mut args = Vec::with_capacity(descriptor.params.len());
	let mut slot = 0u16;
	for param in &descriptor.params {
		args.push((*param, slot));
		slot += param.kind.slots();
	}
	args
}

fn checked_param_slots(descriptor: &MethodDescriptor<'_>) -> Result<u16> {
	let slots = descriptor.param_slots();
	if slots > 255 {
		return Err(TransformError::ClassTooLarge("method parameter slots"));
	}
	Ok(slots)
}

/// Registers name, descriptor, and the member reference of a fresh proxy.
fn declare_proxy(
	pool: &mut ConstantPool<'_>,
	class: &ClassContext<'_>,
	descriptor: &str,
) -> Result<(u16, u16, u16)> {
	let name = pool.synthetic_method_name(runtime::PROXY_PREFIX)?;
	let name_index = pool.add_utf8(&name)?;
	let descriptor_index = pool.add_utf8(descriptor)?;
	let member = pool.add_method_ref(class.name, &name, descriptor)?;
	Ok((name_index, descriptor_index, member))
}

const PROXY_FLAGS: MethodFlags =
	MethodFlags::PRIVATE.union(MethodFlags::STATIC).union(MethodFlags::SYNTHETIC);

/// PLAIN proxy: forwards unconditionally. Only retargeted method-handle
/// constants use it; the target-side check inside the operation itself
/// keeps it honest.
pub(crate) fn synthesize_plain_proxy(
	pool: &mut ConstantPool<'_>,
	buf: &mut MethodBuffer,
	class: &ClassContext<'_>,
	spec: &ProxySpec,
) -> Result<u16> {
	let descriptor_text = spec.descriptor()?;
	let descriptor = MethodDescriptor::parse(&descriptor_text)?;
	let slots = checked_param_slots(&descriptor)?;
	let (name_index, descriptor_index, member) = declare_proxy(pool, class, &descriptor_text)?;

	let mut gen = CodeGen::new(0, slots);
	emit_forward(&mut gen, pool, spec, &descriptor)?;

	let initial = FrameState::initial(true, class.name, &descriptor, false);
	buf.append(pool, PROXY_FLAGS, name_index, descriptor_index, gen, &initial, class.name)?;
	Ok(member)
}

/// CALLER proxy: compares the module of the proxy's class with the target
/// class's module by identity; equal modules forward, anything else runs
/// the denial action.
pub(crate) fn synthesize_caller_proxy(
	pool: &mut ConstantPool<'_>,
	buf: &mut MethodBuffer,
	class: &ClassContext<'_>,
	spec: &ProxySpec,
	action: &DenyAction,
) -> Result<u16> {
	let action = if spec.is_constructor() { action.for_constructor() } else { action.clone() };
	let descriptor_text = spec.descriptor()?;
	let descriptor = MethodDescriptor::parse(&descriptor_text)?;
	let slots = checked_param_slots(&descriptor)?;
	let (name_index, descriptor_index, member) = declare_proxy(pool, class, &descriptor_text)?;

	let mut gen = CodeGen::new(0, slots);
	let get_module =
		pool.add_method_ref(runtime::CLASS_CLASS, runtime::GET_MODULE.0, runtime::GET_MODULE.1)?;
	let target_class = pool.add_class(&spec.member.class)?;
	gen.ldc(class.index);
	gen.invoke(OpCode::invokevirtual, get_module, 1, 1);
	gen.ldc(target_class);
	gen.invoke(OpCode::invokevirtual, get_module, 1, 1);
	let same_module = gen.branch(OpCode::if_acmpeq);

	let ctx = DenyContext {
		this_class_index: class.index,
		target_class: &spec.member.class,
		method_name: (!spec.is_constructor()).then_some(spec.member.name.as_ref()),
		descriptor: &spec.member.descriptor,
		return_type: descriptor.ret,
		args: proxy_args(&descriptor),
		caller: CallerSource::OwnClass,
	};
	let mut allowed = Allowed::Forward(Vec::new());
	emit_deny_action(&mut gen, pool, &action, &ctx, &mut allowed)?;

	// Patched first: the frame recorded for the join must be the lean
	// compare-path state, not one with denial-path temporaries.
	gen.patch(same_module)?;
	if let Allowed::Forward(branches) = allowed {
		for branch in branches {
			gen.patch(branch)?;
		}
	}
	emit_forward(&mut gen, pool, spec, &descriptor)?;

	let initial = FrameState::initial(true, class.name, &descriptor, false);
	buf.append(pool, PROXY_FLAGS, name_index, descriptor_index, gen, &initial, class.name)?;
	Ok(member)
}

/// REFLECTION proxy: fetches the caller-aware reflection shim and hands the
/// whole operation to it.
pub(crate) fn synthesize_reflection_proxy(
	pool: &mut ConstantPool<'_>,
	buf: &mut MethodBuffer,
	class: &ClassContext<'_>,
	spec: &ProxySpec,
) -> Result<u16> {
	let descriptor_text = spec.descriptor()?;
	let descriptor = MethodDescriptor::parse(&descriptor_text)?;
	let slots = checked_param_slots(&descriptor)?;
	let (name_index, descriptor_index, member) = declare_proxy(pool, class, &descriptor_text)?;

	let mut gen = CodeGen::new(0, slots);
	let reflection =
		pool.add_method_ref(runtime::GATE_CLASS, runtime::REFLECTION.0, runtime::REFLECTION.1)?;
	gen.invoke(OpCode::invokestatic, reflection, 0, 1);
	let mut slot = 0u16;
	for param in &descriptor.params {
		gen.load(param.kind, slot);
		slot += param.kind.slots();
	}
	let delegate =
		pool.add_method_ref(runtime::REFLECTOR_CLASS, &spec.member.name, &descriptor_text)?;
	let ret_slots = descriptor.ret.as_ref().map_or(0, |r| r.kind.slots());
	gen.invoke(OpCode::invokevirtual, delegate, slots + 1, ret_slots);
	gen.ret(descriptor.ret.as_ref());

	let initial = FrameState::initial(true, class.name, &descriptor, false);
	buf.append(pool, PROXY_FLAGS, name_index, descriptor_index, gen, &initial, class.name)?;
	Ok(member)
}

/// Non-native twin of an intercepted native method: runs the target-side
/// check, then calls the renamed native under the original signature.
#[allow(clippy::too_many_arguments)]
pub(crate) fn synthesize_native_twin(
	pool: &mut ConstantPool<'_>,
	buf: &mut MethodBuffer,
	class: &ClassContext<'_>,
	flags: MethodFlags,
	name: &str,
	descriptor_text: &str,
	renamed: &str,
	action: &DenyAction,
) -> Result<()> {
	let descriptor = MethodDescriptor::parse(descriptor_text)?;
	let is_static = flags.is_static();
	let receiver_slots = u16::from(!is_static);
	let slots = checked_param_slots(&descriptor)?
		.checked_add(receiver_slots)
		.filter(|s| *s <= 255)
		.ok_or(TransformError::ClassTooLarge("method parameter slots"))?;

	let name_index = pool.add_utf8(name)?;
	let descriptor_index = pool.add_utf8(descriptor_text)?;
	let renamed_member = pool.add_method_ref(class.name, renamed, descriptor_text)?;

	let mut gen = CodeGen::new(0, slots);
	let mut args = Vec::new();
	if !is_static {
		args.push((
			ParamType { kind: TypeKind::Reference, text: "Ljava/lang/Object;" },
			0,
		));
	}
	let mut slot = receiver_slots;
	for param in &descriptor.params {
		args.push((*param, slot));
		slot += param.kind.slots();
	}

	let caller = if action.needs_caller() {
		CallerSource::Slot(gen.alloc_local(1))
	} else {
		CallerSource::Null
	};
	let ctx = DenyContext {
		this_class_index: class.index,
		target_class: class.name,
		method_name: Some(name),
		descriptor: descriptor_text,
		return_type: descriptor.ret,
		args,
		caller,
	};
	let denied = emit_check(&mut gen, pool, &ctx, action)?;

	let forward_at = gen.pc();
	let mut slot = 0u16;
	if !is_static {
		gen.load_ref(0);
		slot = 1;
	}
	for param in &descriptor.params {
		gen.load(param.kind, slot);
		slot += param.kind.slots();
	}
	let param_slots = descriptor.param_slots();
	let ret_slots = descriptor.ret.as_ref().map_or(0, |r| r.kind.slots());
	if is_static {
		gen.invoke(OpCode::invokestatic, renamed_member, param_slots, ret_slots);
	} else {
		gen.invoke(OpCode::invokespecial, renamed_member, param_slots + 1, ret_slots);
	}
	gen.ret(descriptor.ret.as_ref());

	if let Some(denied) = denied {
		gen.patch(denied)?;
		let mut allowed = Allowed::Backward(forward_at);
		emit_deny_action(&mut gen, pool, action, &ctx, &mut allowed)?;
	}

	let initial = FrameState::initial(is_static, class.name, &descriptor, false);
	let twin_flags = MethodFlags::from_bits_retain(flags.bits() & !MethodFlags::NATIVE.bits());
	buf.append(pool, twin_flags, name_index, descriptor_index, gen, &initial, class.name)?;
	Ok(())
}

/// Frames for every branch target a generator produced: the walker runs to
/// the branch, then the branch's own pops are applied.
pub(crate) fn branch_target_frames(
	gen: &CodeGen,
	entry: &FrameState,
	pool: &ConstantPool<'_>,
	this_class: &str,
	base: usize,
) -> Result<Vec<(u16, FrameState)>> {
	let code = gen.code.as_slice();
	let mut out: Vec<(u16, FrameState)> = Vec::new();
	for mark in &gen.marks {
		// Branches back out of this block (into the preserved body) get
		// their frame from the table rebuild, not from this generator.
		if mark.target < gen.base {
			continue;
		}
		if out.iter().any(|(offset, _)| *offset as usize == mark.target.saturating_sub(base)) {
			continue;
		}
		let mut state = entry.clone();
		if mark.target < mark.pc {
			// Backward branch onto code also reached by fall-through; the
			// linear state there is the one every inbound path agrees on.
			frames::interpret(code, mark.target - gen.base, &mut state, pool, this_class)?;
		} else {
			frames::interpret(code, mark.pc - gen.base, &mut state, pool, this_class)?;
			match CodeGen::branch_delta(mark.op) {
				-1 => {
					let _ = state.stack.pop();
				}
				-2 => {
					state.stack.truncate(state.stack.len().saturating_sub(2));
				}
				_ => {}
			}
		}
		let offset = mark.target - base;
		out.push((offset.min(u16::MAX as usize) as u16, state));
	}
	out.sort_by_key(|(offset, _)| *offset);
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::utilities::Reader;

	fn with_pool<R>(f: impl FnOnce(&mut ConstantPool<'_>) -> R) -> R {
		let data = {
			let mut w = Writer::new();
			w.u16(1);
			w.into_vec()
		};
		let mut reader = Reader::new(&data);
		let mut pool = ConstantPool::parse(&mut reader, &data).unwrap();
		f(&mut pool)
	}

	fn int_type() -> ParamType<'static> {
		ParamType { kind: TypeKind::Int, text: "I" }
	}

	fn ref_type(text: &'static str) -> ParamType<'static> {
		ParamType { kind: TypeKind::Reference, text }
	}

	fn deny_ctx(
		return_type: Option<ParamType<'static>>,
		args: Vec<(ParamType<'static>, u16)>,
	) -> DenyContext<'static> {
		DenyContext {
			this_class_index: 1,
			target_class: "x/X",
			method_name: Some("op"),
			descriptor: "()V",
			return_type,
			args,
			caller: CallerSource::Null,
		}
	}

	fn handler(descriptor: &str) -> HandleInfo {
		HandleInfo {
			kind: HandleKind::InvokeStatic,
			class: "app/Handlers".into(),
			name: "handle".into(),
			descriptor: descriptor.into(),
		}
	}

	/// Runs the denial encoder on a fresh generator; yields the emitted
	/// bytecode and the number of collected allowed-path branches.
	fn emit(action: &DenyAction, ctx: &DenyContext<'_>) -> Result<(Vec<u8>, usize)> {
		with_pool(|pool| {
			let mut gen = CodeGen::new(0, 4);
			let mut allowed = Allowed::Forward(Vec::new());
			emit_deny_action(&mut gen, pool, action, ctx, &mut allowed)?;
			let branches = match allowed {
				Allowed::Forward(branches) => branches.len(),
				Allowed::Backward(_) => 0,
			};
			Ok((gen.into_code(), branches))
		})
	}

	#[test]
	fn custom_handler_returns_the_substitute() {
		let ctx = deny_ctx(Some(int_type()), vec![(int_type(), 0)]);
		let action = DenyAction::Custom { handler: handler("(I)I") };
		let (code, _) = emit(&action, &ctx).unwrap();
		// ldc handle; iload_0; invokevirtual MethodHandle.invoke; ireturn
		assert_eq!(code[0], 0x12);
		assert_eq!(code[2], 0x1a);
		assert_eq!(code[3], 0xb6);
		assert_eq!(code[code.len() - 1], 0xac);
	}

	#[test]
	fn custom_handler_result_dropped_for_void_operation() {
		let ctx = deny_ctx(None, vec![(int_type(), 0)]);
		let action = DenyAction::Custom { handler: handler("(I)Ljava/lang/Object;") };
		let (code, _) = emit(&action, &ctx).unwrap();
		assert_eq!(code[0], 0x12, "handle constant load");
		assert_eq!(&code[code.len() - 2..], &[0x57, 0xb1], "pop then return");
	}

	#[test]
	fn custom_wide_handler_result_dropped_with_pop2() {
		let ctx = deny_ctx(None, Vec::new());
		let action = DenyAction::Custom { handler: handler("()J") };
		let (code, _) = emit(&action, &ctx).unwrap();
		assert_eq!(&code[code.len() - 2..], &[0x58, 0xb1]);
	}

	#[test]
	fn custom_void_handler_cannot_substitute_a_value() {
		let ctx = deny_ctx(Some(int_type()), Vec::new());
		let action = DenyAction::Custom { handler: handler("()V") };
		assert!(matches!(emit(&action, &ctx), Err(TransformError::Internal(_))));
	}

	#[test]
	fn gated_predicate_branches_to_the_allowed_path() {
		let ctx = deny_ctx(None, Vec::new());
		let action = DenyAction::Checked {
			predicate: handler("(Ljava/lang/Class;)Z"),
			action: Box::new(DenyAction::Exception),
		};
		let (code, branches) = emit(&action, &ctx).unwrap();
		assert_eq!(branches, 1, "allowed continuation collected");
		// ldc predicate handle; aconst_null caller; invoke; ifne; throw.
		assert_eq!(code[0], 0x12);
		assert_eq!(code[2], 0x01);
		assert_eq!(code[3], 0xb6);
		assert_eq!(code[6], 0x9a);
		assert_eq!(code[code.len() - 1], 0xbf);
	}

	#[test]
	fn nested_gating_is_an_internal_error() {
		let ctx = deny_ctx(None, Vec::new());
		let inner = DenyAction::Checked {
			predicate: handler("()Z"),
			action: Box::new(DenyAction::Exception),
		};
		let action = DenyAction::Checked { predicate: handler("()Z"), action: Box::new(inner) };
		assert!(matches!(emit(&action, &ctx), Err(TransformError::Internal(_))));
	}

	#[test]
	fn dynamic_action_dispatches_and_unboxes() {
		let ctx = deny_ctx(Some(int_type()), Vec::new());
		let (code, _) = emit(&DenyAction::Dynamic { checked: false }, &ctx).unwrap();
		// Null caller, target class, name, descriptor, Integer.TYPE, null
		// payload, dispatcher, checkcast + intValue, ireturn.
		assert_eq!(code[0], 0x01);
		assert!(code.contains(&0xb2), "getstatic of the TYPE field");
		assert!(code.contains(&0xb8), "invokestatic of the dispatcher");
		assert!(code.contains(&0xc0), "checkcast of the box class");
		assert_eq!(code[code.len() - 1], 0xac);
	}

	#[test]
	fn dynamic_void_operation_pops_the_result() {
		let ctx = deny_ctx(None, Vec::new());
		let (code, _) = emit(&DenyAction::Dynamic { checked: false }, &ctx).unwrap();
		assert_eq!(&code[code.len() - 2..], &[0x57, 0xb1]);
	}

	#[test]
	fn checked_dynamic_compares_against_the_args_array() {
		let ctx = deny_ctx(Some(int_type()), vec![(int_type(), 0), (int_type(), 1)]);
		let (code, branches) = emit(&DenyAction::Dynamic { checked: true }, &ctx).unwrap();
		assert_eq!(branches, 1, "allowed fallthrough goto");
		assert!(code.contains(&0xbd), "object array allocation");
		assert!(code.contains(&0x53), "aastore fill");
		assert!(code.contains(&0xa6), "identity comparison");
		assert_eq!(code[code.len() - 1], 0xac);
	}

	#[test]
	fn empty_primitive_array_return() {
		let ctx = deny_ctx(Some(ref_type("[I")), Vec::new());
		let (code, _) = emit(&DenyAction::Empty, &ctx).unwrap();
		// iconst_0; newarray int; areturn
		assert_eq!(code, [0x03, 0xbc, 10, 0xb0]);
	}

	#[test]
	fn empty_reference_array_return() {
		let ctx = deny_ctx(Some(ref_type("[Ljava/lang/String;")), Vec::new());
		let (code, _) = emit(&DenyAction::Empty, &ctx).unwrap();
		assert_eq!(code[0], 0x03);
		assert_eq!(code[1], 0xbd);
		assert_eq!(code[code.len() - 1], 0xb0);
	}

	#[test]
	fn empty_uses_registered_factories() {
		let ctx = deny_ctx(Some(ref_type("Ljava/util/List;")), Vec::new());
		let (code, _) = emit(&DenyAction::Empty, &ctx).unwrap();
		// invokestatic Gate.emptyList; areturn
		assert_eq!(code.len(), 4);
		assert_eq!(code[0], 0xb8);
		assert_eq!(code[3], 0xb0);
	}

	#[test]
	fn empty_string_is_a_literal() {
		let ctx = deny_ctx(Some(ref_type("Ljava/lang/String;")), Vec::new());
		let (code, _) = emit(&DenyAction::Empty, &ctx).unwrap();
		assert_eq!(code[0], 0x12);
		assert_eq!(code[code.len() - 1], 0xb0);
	}

	#[test]
	fn empty_falls_back_to_a_no_arg_constructor() {
		let ctx = deny_ctx(Some(ref_type("La/Widget;")), Vec::new());
		let (code, _) = emit(&DenyAction::Empty, &ctx).unwrap();
		// new; dup; invokespecial <init>; areturn
		assert_eq!(code[0], 0xbb);
		assert_eq!(code[3], 0x59);
		assert_eq!(code[4], 0xb7);
		assert_eq!(code[code.len() - 1], 0xb0);
	}
}
