mod actions;
mod cache;

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use fxhash::FxHashMap;

pub use actions::{ConstValue, DenyAction, HandleInfo};

use cache::StripedCache;

/// Outcome of a rule lookup for one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
	Allow,
	/// The check is spliced into every call site inside the caller module.
	DenyAtCaller(DenyAction),
	/// The check is inserted at the start of the operation's own body.
	DenyAtTarget(DenyAction),
}

impl Rule {
	pub fn is_allow(&self) -> bool {
		matches!(self, Rule::Allow)
	}
}

/// Methods of the root object type that every value observably has; rules
/// never apply to them.
const UNIVERSAL: [(&str, &str); 3] = [
	("equals", "(Ljava/lang/Object;)Z"),
	("hashCode", "()I"),
	("toString", "()Ljava/lang/String;"),
];

#[derive(Debug, Default)]
struct MethodRules {
	variants: FxHashMap<Box<str>, Rule>,
	default: Option<Rule>,
}

#[derive(Debug, Default)]
struct ClassRules {
	methods: FxHashMap<Box<str>, MethodRules>,
	default: Option<Rule>,
}

#[derive(Debug, Default)]
struct PackageRules {
	classes: FxHashMap<Box<str>, ClassRules>,
	default: Option<Rule>,
}

/// Flattened, immutable view of every rule affecting one target class.
#[derive(Debug)]
struct ClassTable {
	base: Rule,
	methods: FxHashMap<Box<str>, MethodTable>,
	any_caller_denied: bool,
	any_target_denied: bool,
	all_allowed: bool,
}

#[derive(Debug)]
struct MethodTable {
	variants: FxHashMap<Box<str>, Rule>,
	default: Option<Rule>,
}

/// Rules one caller module must obey, rooted at that module's identity:
/// maps of explicit entries plus a default at every level, most specific
/// entry wins.
pub struct ModuleRules {
	packages: FxHashMap<Box<str>, PackageRules>,
	default: Rule,
	views: StripedCache<ClassTable>,
}

impl Debug for ModuleRules {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ModuleRules")
			.field("packages", &self.packages)
			.field("default", &self.default)
			.finish_non_exhaustive()
	}
}

impl Default for ModuleRules {
	fn default() -> Self {
		Self::new()
	}
}

impl ModuleRules {
	/// Empty rule set defaulting to allow-all.
	pub fn new() -> Self {
		Self::with_default(Rule::Allow)
	}

	pub fn with_default(default: Rule) -> Self {
		Self { packages: FxHashMap::default(), default, views: StripedCache::default() }
	}

	pub fn set_package_rule(&mut self, package: &str, rule: Rule) {
		self.views.clear();
		self.packages.entry(package.into()).or_default().default = Some(rule);
	}

	pub fn set_class_rule(&mut self, package: &str, class: &str, rule: Rule) {
		self.views.clear();
		self.class_entry(package, class).default = Some(rule);
	}

	pub fn set_method_rule(&mut self, package: &str, class: &str, method: &str, rule: Rule) {
		self.views.clear();
		self.class_entry(package, class).methods.entry(method.into()).or_default().default = Some(rule);
	}

	pub fn set_variant_rule(
		&mut self,
		package: &str,
		class: &str,
		method: &str,
		descriptor: &str,
		rule: Rule,
	) {
		self.views.clear();
		self.class_entry(package, class)
			.methods
			.entry(method.into())
			.or_default()
			.variants
			.insert(descriptor.into(), rule);
	}

	fn class_entry(&mut self, package: &str, class: &str) -> &mut ClassRules {
		self.packages.entry(package.into()).or_default().classes.entry(class.into()).or_default()
	}

	/// Whether any rule in the forest (defaults included) denies at the
	/// caller; lets the transformer skip bytecode scans wholesale.
	pub fn has_caller_denials(&self) -> bool {
		self.any_rule(|rule| matches!(rule, Rule::DenyAtCaller(_)))
	}

	pub fn has_target_denials(&self) -> bool {
		self.any_rule(|rule| matches!(rule, Rule::DenyAtTarget(_)))
	}

	fn any_rule(&self, pred: impl Fn(&Rule) -> bool) -> bool {
		if pred(&self.default) {
			return true;
		}
		self.packages.values().any(|package| {
			package.default.as_ref().is_some_and(&pred)
				|| package.classes.values().any(|class| {
					class.default.as_ref().is_some_and(&pred)
						|| class.methods.values().any(|method| {
							method.default.as_ref().is_some_and(&pred)
								|| method.variants.values().any(&pred)
						})
				})
		})
	}

	/// Per-class view over this module's rules, memoized process-wide.
	pub fn class_view(&self, package: &str, class: &str) -> ClassView {
		let key = if package.is_empty() { class.to_owned() } else { format!("{package}/{class}") };
		let table = self.views.get_or_insert_with(&key, || self.flatten(package, class));
		ClassView { table }
	}

	fn flatten(&self, package: &str, class: &str) -> ClassTable {
		let package_rules = self.packages.get(package);
		let class_rules = package_rules.and_then(|p| p.classes.get(class));

		let base = class_rules
			.and_then(|c| c.default.clone())
			.or_else(|| package_rules.and_then(|p| p.default.clone()))
			.unwrap_or_else(|| self.default.clone());

		let mut methods = FxHashMap::default();
		if let Some(class_rules) = class_rules {
			for (name, method) in &class_rules.methods {
				methods.insert(
					name.clone(),
					MethodTable { variants: method.variants.clone(), default: method.default.clone() },
				);
			}
		}

		let mut any_caller_denied = matches!(base, Rule::DenyAtCaller(_));
		let mut any_target_denied = matches!(base, Rule::DenyAtTarget(_));
		let mut all_allowed = base.is_allow();
		for rule in methods.values().flat_map(|m| m.variants.values().chain(m.default.as_ref())) {
			any_caller_denied |= matches!(rule, Rule::DenyAtCaller(_));
			any_target_denied |= matches!(rule, Rule::DenyAtTarget(_));
			all_allowed &= rule.is_allow();
		}

		ClassTable { base, methods, any_caller_denied, any_target_denied, all_allowed }
	}
}

/// Caller-side view of the rules affecting one target class.
#[derive(Clone)]
pub struct ClassView {
	table: Arc<ClassTable>,
}

impl ClassView {
	pub fn rule_for(&self, name: &str, descriptor: &str) -> Rule {
		if UNIVERSAL.contains(&(name, descriptor)) {
			return Rule::Allow;
		}
		let method = match self.table.methods.get(name) {
			Some(method) => method,
			None => return self.table.base.clone(),
		};
		method
			.variants
			.get(descriptor)
			.or(method.default.as_ref())
			.cloned()
			.unwrap_or_else(|| self.table.base.clone())
	}

	pub fn is_all_allowed(&self) -> bool {
		self.table.all_allowed
	}

	pub fn is_any_denied_at_caller(&self) -> bool {
		self.table.any_caller_denied
	}

	pub fn is_any_denied_at_target(&self) -> bool {
		self.table.any_target_denied
	}
}

/// Union of every caller module's rules, queried to decide whether a class
/// needs target-side checks in its own method bodies.
#[derive(Clone, Default)]
pub struct TargetRules {
	modules: Vec<Arc<ModuleRules>>,
}

impl TargetRules {
	pub fn new(modules: impl IntoIterator<Item = Arc<ModuleRules>>) -> Self {
		Self { modules: modules.into_iter().collect() }
	}

	pub fn of(module: Arc<ModuleRules>) -> Self {
		Self { modules: vec![module] }
	}

	pub fn has_target_denials(&self) -> bool {
		self.modules.iter().any(|m| m.has_target_denials())
	}

	pub fn class_view(&self, package: &str, class: &str) -> TargetView {
		TargetView { views: self.modules.iter().map(|m| m.class_view(package, class)).collect() }
	}
}

/// Target-side view: only deny-at-target rules are visible through it.
pub struct TargetView {
	views: Vec<ClassView>,
}

impl TargetView {
	pub fn rule_for(&self, name: &str, descriptor: &str) -> Rule {
		for view in &self.views {
			if let rule @ Rule::DenyAtTarget(_) = view.rule_for(name, descriptor) {
				return rule;
			}
		}
		Rule::Allow
	}

	pub fn is_any_denied(&self) -> bool {
		self.views.iter().any(ClassView::is_any_denied_at_target)
	}
}

/// Splits a binary class name into (package, simple name).
pub(crate) fn split_binary_name(name: &str) -> (&str, &str) {
	match name.rfind('/') {
		Some(at) => (&name[..at], &name[at + 1..]),
		None => ("", name),
	}
}
