use crate::errors::Result;
use crate::raw::pool::ConstantPool;
use crate::rules::{split_binary_name, ModuleRules, Rule};
use crate::transform::code::{ProxyCache, ProxyFlavor, ProxyKey};
use crate::transform::proxy::{
	synthesize_caller_proxy, synthesize_plain_proxy, ClassContext, MethodBuffer, ProxySpec,
};

/// Byte patch rewriting one method-handle constant onto a proxy: the
/// reference kind becomes invoke-static and the member index is replaced.
#[derive(Debug, Copy, Clone)]
pub(crate) struct HandlePatch {
	/// Offset of the constant's tag byte in the original image.
	pub offset: usize,
	pub proxy: u16,
}

/// Scans every method-handle constant and retargets those referencing a
/// denied operation at a synthesized proxy. Field handles pass through.
pub(crate) fn rewrite_handle_constants(
	pool: &mut ConstantPool<'_>,
	buf: &mut MethodBuffer,
	proxies: &mut ProxyCache,
	class: &ClassContext<'_>,
	caller: &ModuleRules,
) -> Result<Vec<HandlePatch>> {
	let handles: Vec<_> = pool.handle_constants().to_vec();
	let mut patches = Vec::new();

	for handle in handles {
		if !handle.kind.is_invocation() {
			continue;
		}
		let member = pool.member_ref(handle.member)?;
		let (package, simple) = split_binary_name(&member.class);
		let rule = caller.class_view(package, simple).rule_for(&member.name, &member.descriptor);

		let flavor = match &rule {
			Rule::Allow => continue,
			Rule::DenyAtTarget(_) => ProxyFlavor::Plain,
			Rule::DenyAtCaller(_) => ProxyFlavor::Caller,
		};
		let key = ProxyKey { member: handle.member, kind: handle.kind, flavor };
		let proxy = match proxies.get(&key) {
			Some(proxy) => *proxy,
			None => {
				let spec = ProxySpec { member_index: handle.member, member, kind: handle.kind };
				let proxy = match &rule {
					Rule::DenyAtTarget(_) => synthesize_plain_proxy(pool, buf, class, &spec)?,
					Rule::DenyAtCaller(action) => {
						synthesize_caller_proxy(pool, buf, class, &spec, action)?
					}
					Rule::Allow => continue,
				};
				proxies.insert(key, proxy);
				proxy
			}
		};
		patches.push(HandlePatch { offset: handle.offset, proxy });
	}
	Ok(patches)
}
