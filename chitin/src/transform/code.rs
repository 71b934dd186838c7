use fxhash::FxHashMap;

use crate::errors::{Result, TransformError};
use crate::raw::descriptor::{MethodDescriptor, ParamType, TypeKind};
use crate::raw::flags::MethodFlags;
use crate::raw::opcodes::{instruction_end, OpCode};
use crate::raw::pool::{ConstantPool, HandleKind};
use crate::rules::{split_binary_name, DenyAction, ModuleRules, Rule};
use crate::transform::frames::{self, FrameState};
use crate::transform::ledger::RegionLedger;
use crate::transform::proxy::{
	self, Allowed, CallerSource, ClassContext, CodeGen, DenyContext, MethodBuffer, ProxySpec,
};
use crate::transform::runtime;

/// Proxies already synthesized for this class, so repeated call sites of
/// one denied operation share a single method.
pub(crate) type ProxyCache = FxHashMap<ProxyKey, u16>;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub(crate) struct ProxyKey {
	pub member: u16,
	pub kind: HandleKind,
	pub flavor: ProxyFlavor,
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub(crate) enum ProxyFlavor {
	Plain,
	Caller,
	Reflection,
}

/// One method's code attribute, as located by the driver.
pub(crate) struct CodeAttribute<'l> {
	/// Offset of the attribute's six-byte header within the class file.
	pub offset: usize,
	pub body: &'l [u8],
}

pub(crate) struct MethodIdent<'l> {
	pub flags: MethodFlags,
	pub name: &'l str,
	pub descriptor: &'l str,
}

struct DecodedCode<'l> {
	max_stack: u16,
	max_locals: u16,
	code: &'l [u8],
	exceptions: Vec<[u16; 4]>,
	attributes: Vec<(u16, &'l [u8])>,
}

fn decode_attribute<'l>(body: &'l [u8]) -> Result<DecodedCode<'l>> {
	let mut reader = crate::utilities::Reader::new(body);
	let max_stack = reader.u16()?;
	let max_locals = reader.u16()?;
	let code_len = reader.u32()? as usize;
	let code = reader.bytes(code_len)?;

	let exception_count = reader.u16()?;
	let mut exceptions = Vec::with_capacity(exception_count as usize);
	for _ in 0..exception_count {
		exceptions.push([reader.u16()?, reader.u16()?, reader.u16()?, reader.u16()?]);
	}

	let attribute_count = reader.u16()?;
	let mut attributes = Vec::with_capacity(attribute_count as usize);
	for _ in 0..attribute_count {
		let name = reader.u16()?;
		let length = reader.u32()? as usize;
		attributes.push((name, reader.bytes(length)?));
	}
	Ok(DecodedCode { max_stack, max_locals, code, exceptions, attributes })
}

/// Rewrites one method's code attribute: caller-side splices for denied
/// invocations, plus the target-side check prelude when the method itself
/// is denied. Records the resulting region replacement in the ledger.
#[allow(clippy::too_many_arguments)]
pub(crate) fn rewrite_method_code(
	pool: &mut ConstantPool<'_>,
	ledger: &mut RegionLedger,
	buf: &mut MethodBuffer,
	proxies: &mut ProxyCache,
	class: &ClassContext<'_>,
	caller: &ModuleRules,
	method: &MethodIdent<'_>,
	target_action: Option<&DenyAction>,
	attr: &CodeAttribute<'_>,
	scan: ScanMode,
) -> Result<()> {
	let decoded = decode_attribute(attr.body)?;

	let splices = if scan.callers || scan.reflection {
		scan_for_splices(pool, buf, proxies, class, caller, decoded.code, scan)?
	} else {
		Vec::new()
	};

	if splices.is_empty() && target_action.is_none() {
		return Ok(());
	}

	if target_action.is_none() {
		// Size-preserving splices only: replace the code bytes in place and
		// leave every pc-bearing attribute untouched.
		let mut code = decoded.code.to_vec();
		for (pc, bytes) in &splices {
			code[*pc..*pc + bytes.len()].copy_from_slice(bytes);
		}
		ledger.record(attr.offset + 14, code.len(), code);
		return Ok(());
	}

	let action = target_action.ok_or(TransformError::Internal("prelude without action"))?;
	emit_with_prelude(pool, ledger, class, method, action, attr, &decoded, &splices)
}

/// Which caller-side transformations apply to one method body.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ScanMode {
	pub callers: bool,
	pub reflection: bool,
}

type Splice = (usize, Vec<u8>);

#[allow(clippy::too_many_arguments)]
fn scan_for_splices(
	pool: &mut ConstantPool<'_>,
	buf: &mut MethodBuffer,
	proxies: &mut ProxyCache,
	class: &ClassContext<'_>,
	caller: &ModuleRules,
	code: &[u8],
	scan: ScanMode,
) -> Result<Vec<Splice>> {
	let mut splices = Vec::new();
	let mut pc = 0usize;
	while pc < code.len() {
		let end = instruction_end(code, pc)?;
		let op = OpCode::decode(code[pc])?;
		if op.is_invocation() {
			let member_index = u16::from_be_bytes([code[pc + 1], code[pc + 2]]);
			let member = pool.member_ref(member_index)?;

			let reflective = scan.reflection
				&& op == OpCode::invokevirtual
				&& (member.class.as_ref() == runtime::REFLECTION_ROOT
					|| member.class.as_ref() == runtime::LOOKUP_ROOT);

			if reflective {
				let key = ProxyKey {
					member: member_index,
					kind: HandleKind::InvokeVirtual,
					flavor: ProxyFlavor::Reflection,
				};
				let proxy = match proxies.get(&key) {
					Some(proxy) => *proxy,
					None => {
						let spec = ProxySpec {
							member_index,
							member,
							kind: HandleKind::InvokeVirtual,
						};
						let proxy = proxy::synthesize_reflection_proxy(pool, buf, class, &spec)?;
						proxies.insert(key, proxy);
						proxy
					}
				};
				splices.push((pc, invoke_static_bytes(proxy, end - pc)));
			} else if scan.callers && member.name.as_ref() != "<init>" {
				let (package, simple) = split_binary_name(&member.class);
				let view = caller.class_view(package, simple);
				if let Rule::DenyAtCaller(action) = view.rule_for(&member.name, &member.descriptor) {
					let Some(kind) = ProxySpec::invocation_kind(op, member.interface) else {
						pc = end;
						continue;
					};
					let key = ProxyKey { member: member_index, kind, flavor: ProxyFlavor::Caller };
					let proxy = match proxies.get(&key) {
						Some(proxy) => *proxy,
						None => {
							let spec = ProxySpec { member_index, member, kind };
							let proxy =
								proxy::synthesize_caller_proxy(pool, buf, class, &spec, &action)?;
							proxies.insert(key, proxy);
							proxy
						}
					};
					splices.push((pc, invoke_static_bytes(proxy, end - pc)));
				}
			}
		}
		pc = end;
	}
	Ok(splices)
}

/// Replacement bytes for a call site: an INVOKESTATIC padded with NOPs to
/// the exact byte length of the original invocation.
fn invoke_static_bytes(proxy: u16, original_len: usize) -> Vec<u8> {
	let mut bytes = vec![OpCode::invokestatic as u8];
	bytes.extend_from_slice(&proxy.to_be_bytes());
	bytes.resize(original_len, OpCode::nop as u8);
	bytes
}

#[allow(clippy::too_many_arguments)]
fn emit_with_prelude(
	pool: &mut ConstantPool<'_>,
	ledger: &mut RegionLedger,
	class: &ClassContext<'_>,
	method: &MethodIdent<'_>,
	action: &DenyAction,
	attr: &CodeAttribute<'_>,
	decoded: &DecodedCode<'_>,
	splices: &[Splice],
) -> Result<()> {
	let descriptor = MethodDescriptor::parse(method.descriptor)?;
	let is_static = method.flags.is_static();
	let is_ctor = method.name == "<init>";

	let mut gen = CodeGen::new(0, decoded.max_locals);
	let caller_source = if action.needs_caller() {
		CallerSource::Slot(gen.alloc_local(1))
	} else {
		CallerSource::Null
	};

	let mut args = Vec::new();
	let mut slot = 0u16;
	if !is_static {
		if !is_ctor {
			args.push((ParamType { kind: TypeKind::Reference, text: "Ljava/lang/Object;" }, 0));
		}
		slot = 1;
	}
	for param in &descriptor.params {
		args.push((*param, slot));
		slot += param.kind.slots();
	}

	let ctx = DenyContext {
		this_class_index: class.index,
		target_class: class.name,
		method_name: (!is_ctor).then_some(method.name),
		descriptor: method.descriptor,
		return_type: descriptor.ret,
		args,
		caller: caller_source,
	};

	let denied = proxy::emit_check(&mut gen, pool, &ctx, action)?;
	while gen.len() % 4 != 0 {
		gen.op(OpCode::nop, 0);
	}
	let delta = gen.len();

	// Frame as control reaches the original first instruction. The stored
	// caller class shows up as an extra local here.
	let initial_state = FrameState::initial(is_static, class.name, &descriptor, is_ctor);
	let mut entry_state = initial_state.clone();
	{
		let prelude_code = gen_code_snapshot(&gen);
		frames::interpret(&prelude_code, delta, &mut entry_state, pool, class.name)?;
	}

	let tail_base = delta + decoded.code.len();
	let mut tail = CodeGen::new(tail_base, gen.max_locals());
	let mut appended: Vec<(u16, FrameState)> = Vec::new();
	let mut insert_front = None;

	if let Some(denied) = denied {
		gen.patch_to(denied, tail_base)?;
		let mut allowed = Allowed::Backward(delta);
		proxy::emit_deny_action(&mut tail, pool, action, &ctx, &mut allowed)?;

		appended.push((clamp_pc(tail_base), entry_state.clone()));
		let internal = proxy::branch_target_frames(&tail, &entry_state, pool, class.name, 0)?;
		for frame in internal {
			if !appended.iter().any(|(offset, _)| *offset == frame.0) {
				appended.push(frame);
			}
		}
		appended.sort_by_key(|(offset, _)| *offset);

		if tail.marks().iter().any(|mark| mark.target < tail_base) {
			// Declared with the unextended initial locals so the relative
			// encoding of every original entry keeps its meaning; the
			// caller slot is dead inside the preserved body anyway.
			insert_front = Some((clamp_pc(delta), initial_state.clone()));
		}
	}

	let total_len = tail_base + tail.len();
	if total_len > u16::MAX as usize {
		return Err(TransformError::ClassTooLarge("method body"));
	}

	let new_max_stack = decoded
		.max_stack
		.max(gen.max_stack())
		.max(tail.max_stack());
	let new_max_locals = decoded.max_locals.max(gen.max_locals()).max(tail.max_locals());

	// Assemble the replacement: everything from the attribute_length field
	// onward. The name index ahead of it is preserved verbatim.
	let mut out = crate::utilities::Writer::new();
	out.u32(0);
	let body_start = out.len();

	out.u16(new_max_stack);
	out.u16(new_max_locals);
	out.u32(total_len as u32);
	out.bytes(&gen_code_snapshot(&gen));
	let mut body = decoded.code.to_vec();
	for (pc, bytes) in splices {
		body[*pc..*pc + bytes.len()].copy_from_slice(bytes);
	}
	out.bytes(&body);
	out.bytes(&gen_code_snapshot(&tail));

	out.u16(decoded.exceptions.len() as u16);
	for [start, end, handler, catch] in &decoded.exceptions {
		out.u16(shift_pc(*start, delta));
		out.u16(shift_pc(*end, delta));
		out.u16(shift_pc(*handler, delta));
		out.u16(*catch);
	}

	let mut rebuilt_table = false;
	let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();
	for (name_index, body) in decoded.attributes.iter().copied() {
		let name = pool.utf8(name_index)?.into_owned();
		let rebuilt = match name.as_str() {
			"LineNumberTable" => shift_line_numbers(body, delta)?,
			"LocalVariableTable" | "LocalVariableTypeTable" => shift_local_variables(body, delta)?,
			"StackMapTable" => {
				rebuilt_table = true;
				frames::rebuild_table(
					Some(body),
					delta as u16,
					insert_front.as_ref(),
					&appended,
					pool,
				)?
			}
			_ => body.to_vec(),
		};
		attributes.push((name_index, rebuilt));
	}
	if !rebuilt_table && (insert_front.is_some() || !appended.is_empty()) {
		let name = pool.add_utf8("StackMapTable")?;
		let table =
			frames::rebuild_table(None, delta as u16, insert_front.as_ref(), &appended, pool)?;
		attributes.push((name, table));
	}

	out.u16(attributes.len() as u16);
	for (name_index, body) in &attributes {
		out.u16(*name_index);
		out.u32(body.len() as u32);
		out.bytes(body);
	}

	let attribute_length = (out.len() - body_start) as u32;
	out.patch_u32_at(0, attribute_length);
	ledger.record(attr.offset + 2, 4 + attr.body.len(), out.into_vec());
	Ok(())
}

fn gen_code_snapshot(gen: &CodeGen) -> Vec<u8> {
	gen.code_slice().to_vec()
}

fn clamp_pc(pc: usize) -> u16 {
	pc.min(u16::MAX as usize) as u16
}

fn shift_pc(pc: u16, delta: usize) -> u16 {
	(pc as usize + delta).min(u16::MAX as usize) as u16
}

fn shift_line_numbers(body: &[u8], delta: usize) -> Result<Vec<u8>> {
	let mut reader = crate::utilities::Reader::new(body);
	let mut out = crate::utilities::Writer::new();
	let count = reader.u16()?;
	out.u16(count);
	for _ in 0..count {
		out.u16(shift_pc(reader.u16()?, delta));
		out.u16(reader.u16()?);
	}
	Ok(out.into_vec())
}

fn shift_local_variables(body: &[u8], delta: usize) -> Result<Vec<u8>> {
	let mut reader = crate::utilities::Reader::new(body);
	let mut out = crate::utilities::Writer::new();
	let count = reader.u16()?;
	out.u16(count);
	for _ in 0..count {
		out.u16(shift_pc(reader.u16()?, delta));
		out.u16(reader.u16()?); // length
		out.u16(reader.u16()?); // name
		out.u16(reader.u16()?); // descriptor or signature
		out.u16(reader.u16()?); // slot
	}
	Ok(out.into_vec())
}
