mod code;
mod frames;
mod handles;
mod ledger;
mod proxy;
pub mod runtime;

use fxhash::FxHashMap;

use crate::errors::{Result, TransformError};
use crate::raw::flags::{ClassFlags, MethodFlags};
use crate::raw::pool::{ConstantPool, HandleKind};
use crate::rules::{split_binary_name, DenyAction, ModuleRules, Rule, TargetRules};
use crate::transform::code::{CodeAttribute, MethodIdent, ProxyCache};
use crate::transform::handles::HandlePatch;
use crate::transform::ledger::RegionLedger;
use crate::transform::proxy::{ClassContext, MethodBuffer};
use crate::utilities::{Reader, Writer};

/// Knobs the agent resolves once per process and hands to every
/// transformation.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
	/// Route invocations on the reflection and lookup root types through
	/// the caller-aware reflection shim.
	pub reflection_checks: bool,
}

/// Rewrites one class. `Ok(None)` means the input needs no rewrite and
/// must be installed unchanged.
pub fn transform(
	data: &[u8],
	caller: &ModuleRules,
	targets: &TargetRules,
	options: &TransformOptions,
) -> Result<Option<Vec<u8>>> {
	Transformer::new(data, caller, targets, options).run()
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
	Unparsed,
	HeaderRead,
	MethodsScanned,
	Emitted,
}

/// Single-use driver over one class-file image. Walks
/// UNPARSED → HEADER_READ → METHODS_SCANNED → EMITTED, one-shot.
pub struct Transformer<'l> {
	data: &'l [u8],
	caller: &'l ModuleRules,
	targets: &'l TargetRules,
	options: &'l TransformOptions,

	state: State,
	pool: Option<ConstantPool<'l>>,
	class_flags: ClassFlags,
	class_name: String,
	this_class: u16,
	methods_count_at: usize,
	methods_count: u16,
	methods_end: usize,
	ledger: RegionLedger,
	new_methods: MethodBuffer,
	proxies: ProxyCache,
	handle_patches: Vec<HandlePatch>,
}

impl<'l> Transformer<'l> {
	pub fn new(
		data: &'l [u8],
		caller: &'l ModuleRules,
		targets: &'l TargetRules,
		options: &'l TransformOptions,
	) -> Self {
		Self {
			data,
			caller,
			targets,
			options,
			state: State::Unparsed,
			pool: None,
			class_flags: ClassFlags::empty(),
			class_name: String::new(),
			this_class: 0,
			methods_count_at: 0,
			methods_count: 0,
			methods_end: 0,
			ledger: RegionLedger::new(),
			new_methods: MethodBuffer::new(),
			proxies: FxHashMap::default(),
			handle_patches: Vec::new(),
		}
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn run(mut self) -> Result<Option<Vec<u8>>> {
		let reader = self.read_header()?;
		self.scan_methods(reader)?;
		self.emit()
	}

	fn advance(&mut self, from: State, to: State) -> Result<()> {
		if self.state != from {
			return Err(TransformError::Internal("driver state out of order"));
		}
		self.state = to;
		Ok(())
	}

	fn read_header(&mut self) -> Result<Reader<'l>> {
		self.advance(State::Unparsed, State::HeaderRead)?;

		let mut reader = Reader::new(self.data);
		if reader.u32()? != crate::raw::MAGIC {
			return Err(TransformError::ignorable("wrong magic number"));
		}
		reader.skip(2)?; // minor version
		if reader.u16()? < crate::raw::MIN_MAJOR_VERSION {
			return Err(TransformError::ignorable("unsupported class file version"));
		}

		let pool = ConstantPool::parse(&mut reader, self.data)?;
		self.class_flags = ClassFlags::from_bits_retain(reader.u16()?);
		self.this_class = reader.u16()?;
		self.class_name = pool.class_name(self.this_class)?.into_owned();
		reader.skip(2)?; // super class

		let interfaces = reader.u16()?;
		reader.skip(interfaces as usize * 2)?;

		let fields = reader.u16()?;
		for _ in 0..fields {
			reader.skip(6)?;
			skip_attributes(&mut reader)?;
		}

		self.pool = Some(pool);
		Ok(reader)
	}

	fn scan_methods(&mut self, mut reader: Reader<'l>) -> Result<()> {
		self.advance(State::HeaderRead, State::MethodsScanned)?;

		// Module descriptors carry no code.
		if self.class_flags.contains(ClassFlags::MODULE) {
			return Ok(());
		}

		let pool = self.pool.as_mut().ok_or(TransformError::Internal("pool missing"))?;
		let (package, simple) = split_binary_name(&self.class_name);
		let target_view = self.targets.class_view(package, simple);
		let class = ClassContext { name: &self.class_name, index: self.this_class };

		let scan_callers = self.caller.has_caller_denials();
		let target_checks = target_view.is_any_denied();

		self.methods_count_at = reader.pos();
		self.methods_count = reader.u16()?;

		for _ in 0..self.methods_count {
			let info_at = reader.pos();
			let flags = MethodFlags::from_bits_retain(reader.u16()?);
			let name_index = reader.u16()?;
			let descriptor_index = reader.u16()?;
			let name = pool.utf8(name_index)?.into_owned();
			let descriptor = pool.utf8(descriptor_index)?.into_owned();

			let mut code_attr = None;
			let attribute_count = reader.u16()?;
			for _ in 0..attribute_count {
				let attr_at = reader.pos();
				let attr_name = reader.u16()?;
				let length = reader.u32()? as usize;
				let body = reader.bytes(length)?;
				if pool.utf8(attr_name)?.as_ref() == "Code" {
					code_attr = Some(CodeAttribute { offset: attr_at, body });
				}
			}

			// The class initializer runs under the VM's control; no caller
			// can be held responsible for it.
			if name == "<clinit>" {
				continue;
			}

			let target_action = if target_checks {
				match target_view.rule_for(&name, &descriptor) {
					Rule::DenyAtTarget(action) => Some(action),
					_ => None,
				}
			} else {
				None
			};

			if flags.is_native() {
				if let Some(action) = &target_action {
					intercept_native(
						pool,
						&mut self.ledger,
						&mut self.new_methods,
						&class,
						info_at,
						flags,
						&name,
						&descriptor,
						action,
					)?;
				}
				continue;
			}

			let Some(attr) = code_attr else { continue };
			let is_ctor = name == "<init>";
			let scan = code::ScanMode {
				callers: scan_callers && !is_ctor,
				reflection: self.options.reflection_checks && !is_ctor,
			};
			if target_action.is_none() && !scan.callers && !scan.reflection {
				continue;
			}

			let method = MethodIdent { flags, name: &name, descriptor: &descriptor };
			code::rewrite_method_code(
				pool,
				&mut self.ledger,
				&mut self.new_methods,
				&mut self.proxies,
				&class,
				self.caller,
				&method,
				target_action.as_ref(),
				&attr,
				scan,
			)?;
		}

		self.methods_end = reader.pos();

		self.handle_patches = handles::rewrite_handle_constants(
			pool,
			&mut self.new_methods,
			&mut self.proxies,
			&class,
			self.caller,
		)?;
		Ok(())
	}

	fn emit(&mut self) -> Result<Option<Vec<u8>>> {
		self.advance(State::MethodsScanned, State::Emitted)?;

		let pool = self.pool.as_ref().ok_or(TransformError::Internal("pool missing"))?;
		if !pool.is_extended()
			&& self.ledger.is_empty()
			&& self.new_methods.is_empty()
			&& self.handle_patches.is_empty()
		{
			return Ok(None);
		}

		let appended = self.new_methods.count();
		let new_count = self
			.methods_count
			.checked_add(appended)
			.ok_or(TransformError::ClassTooLarge("method table"))?;
		if !self.new_methods.is_empty() {
			self.ledger.record(self.methods_end, 0, std::mem::take(&mut self.new_methods).into_bytes());
		}

		let growth = pool.growth();
		let capacity = self.data.len() as i64 + growth as i64 + self.ledger.delta() as i64;
		if capacity > i32::MAX as i64 {
			return Err(TransformError::ClassTooLarge("class file"));
		}
		let capacity = capacity as usize;

		let mut out = Writer::with_capacity(capacity);
		out.bytes(&self.data[..8]);
		out.u16(pool.total_count());
		out.bytes(&self.data[10..pool.end()]);
		out.bytes(pool.extension_bytes());
		self.ledger.assemble(self.data, pool.end(), &mut out)?;

		if out.len() != capacity {
			return Err(TransformError::Internal("assembled length mismatch"));
		}

		// Post-assembly patches: the method count moved by exactly the pool
		// growth; handle constants sit inside the untouched pool bytes.
		out.patch_u16_at(self.methods_count_at + growth, new_count);
		for patch in &self.handle_patches {
			out.patch_u8_at(patch.offset + 1, HandleKind::InvokeStatic as u8);
			out.patch_u16_at(patch.offset + 2, patch.proxy);
		}

		Ok(Some(out.into_vec()))
	}
}

/// Renames a denied native method to its sentinel twin, demotes it to
/// private synthetic, and appends a checked non-native replacement.
#[allow(clippy::too_many_arguments)]
fn intercept_native(
	pool: &mut ConstantPool<'_>,
	ledger: &mut RegionLedger,
	new_methods: &mut MethodBuffer,
	class: &ClassContext<'_>,
	info_at: usize,
	flags: MethodFlags,
	name: &str,
	descriptor: &str,
	action: &DenyAction,
) -> Result<()> {
	let renamed = format!("{}{name}", runtime::NATIVE_SENTINEL);
	let renamed_index = pool.add_utf8(&renamed)?;

	ledger.record(info_at, 2, flags.privatized().bits().to_be_bytes().to_vec());
	ledger.record(info_at + 2, 2, renamed_index.to_be_bytes().to_vec());

	proxy::synthesize_native_twin(pool, new_methods, class, flags, name, descriptor, &renamed, action)
}

fn skip_attributes(reader: &mut Reader<'_>) -> Result<()> {
	let count = reader.u16()?;
	for _ in 0..count {
		reader.skip(2)?;
		let length = reader.u32()? as usize;
		reader.skip(length)?;
	}
	Ok(())
}
