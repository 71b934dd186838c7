//! Symbols of the runtime helper library that emitted bytecode links
//! against. The transformer only ever emits member references to these;
//! the helper itself ships with the agent, not with this crate.

/// Class holding the check entry points and the deny-action dispatcher.
pub const GATE_CLASS: &str = "chitin/runtime/Gate";

/// Caller-sensitive reflection shim returned by [`REFLECTION`].
pub const REFLECTOR_CLASS: &str = "chitin/runtime/Reflector";

/// Process-wide stack walker singleton, stored as a static field on the
/// gate so preludes reach it with one GETSTATIC.
pub const WALKER_FIELD: (&str, &str) = ("WALKER", "Ljava/lang/StackWalker;");

pub const STACK_WALKER_CLASS: &str = "java/lang/StackWalker";
pub const GET_CALLER_CLASS: (&str, &str) = ("getCallerClass", "()Ljava/lang/Class;");

/// `check(caller, target, nameOrNull, descriptor)`; throws when denied.
pub const CHECK: (&str, &str) =
	("check", "(Ljava/lang/Class;Ljava/lang/Class;Ljava/lang/String;Ljava/lang/String;)V");

/// Boolean form used whenever the denial outcome is not the standard throw.
pub const TRY_CHECK: (&str, &str) =
	("tryCheck", "(Ljava/lang/Class;Ljava/lang/Class;Ljava/lang/String;Ljava/lang/String;)Z");

/// `applyDenyAction(caller, target, nameOrNull, descriptor, returnType, args)`.
pub const APPLY_DENY_ACTION: (&str, &str) = (
	"applyDenyAction",
	"(Ljava/lang/Class;Ljava/lang/Class;Ljava/lang/String;Ljava/lang/String;Ljava/lang/Class;Ljava/lang/Object;)Ljava/lang/Object;",
);

/// Accessor for the caller-aware reflection shim.
pub const REFLECTION: (&str, &str) = ("reflection", "()Lchitin/runtime/Reflector;");

pub const CLASS_CLASS: &str = "java/lang/Class";
pub const GET_MODULE: (&str, &str) = ("getModule", "()Ljava/lang/Module;");

pub const OBJECT_CLASS: &str = "java/lang/Object";
pub const STRING_CLASS: &str = "java/lang/String";
pub const METHOD_HANDLE_CLASS: &str = "java/lang/invoke/MethodHandle";
pub const SECURITY_EXCEPTION_CLASS: &str = "java/lang/SecurityException";

/// Invocations on these types are routed through the reflection shim when
/// reflection checks are enabled.
pub const REFLECTION_ROOT: &str = "java/lang/Class";
pub const LOOKUP_ROOT: &str = "java/lang/invoke/MethodHandles$Lookup";

/// Name prefix of the renamed twin of an intercepted native method.
pub const NATIVE_SENTINEL: &str = "$native$";

/// Random-suffix prefix for synthesized proxy methods.
pub const PROXY_PREFIX: &str = "p";

/// Reference types String is assignable to; a string literal may substitute
/// a denied return of any of these.
pub const STRING_SUPERTYPES: [&str; 4] = [
	"java/lang/String",
	"java/lang/Object",
	"java/lang/CharSequence",
	"java/lang/Comparable",
];

/// Canonical empty-instance factories on the gate, keyed by return-type
/// name. Anything absent here falls back to a no-arg constructor call.
pub fn empty_factory(type_name: &str) -> Option<(&'static str, &'static str)> {
	Some(match type_name {
		"java/util/List" => ("emptyList", "()Ljava/util/List;"),
		"java/util/Set" => ("emptySet", "()Ljava/util/Set;"),
		"java/util/Map" => ("emptyMap", "()Ljava/util/Map;"),
		"java/util/Collection" => ("emptyCollection", "()Ljava/util/Collection;"),
		"java/util/Iterator" => ("emptyIterator", "()Ljava/util/Iterator;"),
		"java/lang/Iterable" => ("emptyIterable", "()Ljava/lang/Iterable;"),
		"java/util/Optional" => ("emptyOptional", "()Ljava/util/Optional;"),
		"java/util/stream/Stream" => ("emptyStream", "()Ljava/util/stream/Stream;"),
		_ => return None,
	})
}
