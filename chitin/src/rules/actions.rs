use std::sync::Arc;

use crate::raw::pool::HandleKind;

/// Literal pushed in place of a denied operation's result.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
	Int(i32),
	Long(i64),
	Float(f32),
	Double(f64),
	Str(Arc<str>),
}

/// Symbolic reference to a user-supplied handler or predicate method. The
/// rules builder has already validated it against a live type system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleInfo {
	pub kind: HandleKind,
	pub class: Arc<str>,
	pub name: Arc<str>,
	pub descriptor: Arc<str>,
}

impl HandleInfo {
	/// A handler whose first declared parameter is `java.lang.Class` is
	/// passed the caller class in that position.
	pub(crate) fn takes_caller(&self) -> bool {
		self.descriptor.starts_with("(Ljava/lang/Class;")
	}
}

/// What a denied operation does instead of executing. A closed union; the
/// predicate-gated form may not wrap another predicate-gated form.
#[derive(Debug, Clone, PartialEq)]
pub enum DenyAction {
	/// Throw the standard security exception from inside the runtime helper.
	Exception,
	ExceptionClass { class: Arc<str> },
	ExceptionMessage { class: Arc<str>, message: Arc<str> },
	Value(ConstValue),
	Empty,
	Custom { handler: HandleInfo },
	Checked { predicate: HandleInfo, action: Box<DenyAction> },
	Dynamic { checked: bool },
}

impl DenyAction {
	/// Builds a predicate-gated action. Nesting a gated action inside
	/// another is rejected at construction time.
	pub fn gated(predicate: HandleInfo, action: DenyAction) -> Option<DenyAction> {
		match action {
			DenyAction::Checked { .. } => None,
			action => Some(DenyAction::Checked { predicate, action: Box::new(action) }),
		}
	}

	/// The standard action is enforced wholly inside the helper's `check`;
	/// everything else needs the boolean form plus an emitted denial block.
	pub(crate) fn uses_try_check(&self) -> bool {
		!matches!(self, DenyAction::Exception)
	}

	/// Whether the emitted denial code loads the caller class.
	pub(crate) fn needs_caller(&self) -> bool {
		match self {
			DenyAction::Dynamic { .. } => true,
			DenyAction::Custom { handler } => handler.takes_caller(),
			DenyAction::Checked { predicate, action } => predicate.takes_caller() || action.needs_caller(),
			_ => false,
		}
	}

	/// Constructors cannot produce substitute values; any non-throwing
	/// action collapses to the standard exception for them.
	pub(crate) fn for_constructor(&self) -> DenyAction {
		match self {
			action @ (DenyAction::Exception
			| DenyAction::ExceptionClass { .. }
			| DenyAction::ExceptionMessage { .. }) => action.clone(),
			_ => DenyAction::Exception,
		}
	}
}
