mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;

use chitin::raw::pool::HandleKind;
use chitin::rules::{ConstValue, DenyAction, HandleInfo, ModuleRules, Rule, TargetRules};
use chitin::transform::{transform, TransformOptions};
use chitin::TransformError;

use common::{find, u16be, ClassFile, CodeDef, RawClass};

fn allow_all() -> Arc<ModuleRules> {
	Arc::new(ModuleRules::new())
}

fn deny_caller(package: &str, class: &str, method: &str, action: DenyAction) -> Arc<ModuleRules> {
	let mut rules = ModuleRules::new();
	rules.set_method_rule(package, class, method, Rule::DenyAtCaller(action));
	Arc::new(rules)
}

fn deny_target(package: &str, class: &str, method: &str, action: DenyAction) -> Arc<ModuleRules> {
	let mut rules = ModuleRules::new();
	rules.set_method_rule(package, class, method, Rule::DenyAtTarget(action));
	Arc::new(rules)
}

fn run(bytes: &[u8], rules: &Arc<ModuleRules>) -> Option<Vec<u8>> {
	transform(bytes, rules, &TargetRules::of(rules.clone()), &TransformOptions::default()).unwrap()
}

#[test]
fn unchanged_pass_through() {
	let mut cf = ClassFile::new("a/A");
	// iconst_2; iconst_3; iadd; ireturn
	cf.add_method(0x0009, "sum", "()I", CodeDef::new(2, 0, vec![0x05, 0x06, 0x60, 0xac]));
	let bytes = cf.build();

	let rules = allow_all();
	assert_eq!(run(&bytes, &rules), None);
	// A second pass over unchanged input stays a no-op.
	assert_eq!(run(&bytes, &rules), None);
}

#[test]
fn caller_side_proxy_insertion() {
	let mut cf = ClassFile::new("a/A");
	let foo = cf.method_ref("x/X", "foo", "()V");
	let mut code = vec![0x01, 0xb6];
	code.extend_from_slice(&foo.to_be_bytes());
	code.push(0xb1);
	cf.add_method(0x0009, "bar", "()V", CodeDef::new(1, 0, code.clone()));
	let bytes = cf.build();

	let rules = deny_caller("x", "X", "foo", DenyAction::Exception);
	let out = run(&bytes, &rules).expect("rewrite expected");

	// The invocation is replaced in place: same offset, same three bytes,
	// now an invokestatic of the synthesized proxy.
	let input_at = find(&bytes, &code).unwrap();
	let growth = out.len() as isize - bytes.len() as isize;
	assert!(growth > 0);
	let parsed_in = RawClass::parse(&bytes);
	let parsed_out = RawClass::parse(&out);
	let out_at = input_at + (parsed_out.pool_end - parsed_in.pool_end);
	assert_eq!(out[out_at], 0x01);
	assert_eq!(out[out_at + 1], 0xb8);
	let proxy_ref = u16be(&out, out_at + 2);
	assert_ne!(proxy_ref, foo);
	assert_eq!(out[out_at + 4], 0xb1);

	// One private static synthetic proxy was appended.
	assert_eq!(parsed_out.methods_count, 2);
	let proxy = parsed_out.methods.iter().find(|m| m.name.starts_with("$p$")).unwrap();
	assert_eq!(proxy.flags, 0x0002 | 0x0008 | 0x1000);
	assert_eq!(proxy.descriptor, "(Lx/X;)V");
	let proxy_code = proxy.code_bytes();
	// Module identity comparison, a denial throw, and the forward call.
	assert!(find(proxy_code, &[0xa5]).is_some(), "if_acmpeq missing");
	assert!(find(proxy_code, &[0xbf]).is_some(), "athrow missing");
	let mut forward = vec![0xb6];
	forward.extend_from_slice(&foo.to_be_bytes());
	assert!(find(proxy_code, &forward).is_some(), "forward call missing");

	// The original method body length did not change.
	assert_eq!(parsed_out.method("bar").code_bytes().len(), code.len());
}

#[test]
fn interface_invocation_preserves_width() {
	let mut cf = ClassFile::new("a/A");
	let run_ref = cf.interface_method_ref("x/I", "run", "()V");
	let mut code = vec![0x01, 0xb9];
	code.extend_from_slice(&run_ref.to_be_bytes());
	code.extend_from_slice(&[1, 0]);
	code.push(0xb1);
	cf.add_method(0x0009, "bar", "()V", CodeDef::new(1, 0, code.clone()));
	let bytes = cf.build();

	let rules = deny_caller("x", "I", "run", DenyAction::Exception);
	let out = run(&bytes, &rules).expect("rewrite expected");

	let input_at = find(&bytes, &code).unwrap();
	let out_at = input_at + (RawClass::parse(&out).pool_end - RawClass::parse(&bytes).pool_end);
	// Five bytes become invokestatic plus two nops.
	assert_eq!(out[out_at + 1], 0xb8);
	assert_eq!(&out[out_at + 4..out_at + 6], &[0, 0]);
	assert_eq!(out[out_at + 6], 0xb1);
}

#[test]
fn target_side_prelude_on_public_method() {
	let mut cf = ClassFile::new("y/Y");
	cf.add_method(0x0001, "sensitive", "()I", CodeDef::new(1, 1, vec![0x08, 0xac]));
	let bytes = cf.build();

	let rules = deny_target("y", "Y", "sensitive", DenyAction::Exception);
	let out = run(&bytes, &rules).expect("rewrite expected");

	let parsed = RawClass::parse(&out);
	assert_eq!(parsed.methods_count, 1);
	let method = parsed.method("sensitive");
	let code = method.code_bytes();

	// Walker fetch, caller class, target class, name, descriptor, check;
	// inserted length is rounded up to a multiple of four.
	assert_eq!(code.len(), 18);
	assert_eq!(code[0], 0xb2, "getstatic WALKER");
	assert_eq!(code[3], 0xb6, "invokevirtual getCallerClass");
	assert_eq!(code[6], 0x12, "ldc this class");
	assert_eq!(code[8], 0x12, "ldc method name");
	assert_eq!(code[10], 0x12, "ldc descriptor");
	assert_eq!(code[12], 0xb8, "invokestatic check");
	assert_eq!(code[15], 0x00, "nop padding");
	assert_eq!(&code[16..], &[0x08, 0xac], "original body follows");
	assert!((code.len() - 2) % 4 == 0);
	assert!(method.max_stack() >= 4);
}

#[test]
fn denial_via_return_value() {
	let mut cf = ClassFile::new("z/Z");
	cf.add_method(0x0001, "count", "()J", CodeDef::new(2, 1, vec![0x09, 0xad]));
	let bytes = cf.build();

	let rules = deny_target("z", "Z", "count", DenyAction::Value(ConstValue::Long(7)));
	let out = run(&bytes, &rules).expect("rewrite expected");

	let parsed = RawClass::parse(&out);
	let code = parsed.method("count").code_bytes();

	// try-check with a branch to the appended denial block.
	assert_eq!(code.len(), 26);
	assert_eq!(code[12], 0xb8, "invokestatic tryCheck");
	assert_eq!(code[15], 0x99, "ifeq to denial block");
	assert_eq!(u16be(code, 16), 7, "branch lands on the tail");
	assert_eq!(&code[18..20], &[0x00, 0x00], "nop padding");
	assert_eq!(&code[20..22], &[0x09, 0xad], "original body");
	assert_eq!(code[22], 0x14, "ldc2_w of the substitute long");
	assert_eq!(code[25], 0xad, "lreturn of the substitute");

	// The pool gained the long literal 7.
	let long_seven = [5u8, 0, 0, 0, 0, 0, 0, 0, 7];
	assert!(find(&out, &long_seven).is_some());
}

#[test]
fn denial_via_empty_collection() {
	let mut cf = ClassFile::new("z/Z");
	cf.add_method(0x0001, "list", "()Ljava/util/List;", CodeDef::new(1, 1, vec![0x01, 0xb0]));
	let bytes = cf.build();

	let rules = deny_target("z", "Z", "list", DenyAction::Empty);
	let out = run(&bytes, &rules).expect("rewrite expected");

	let parsed = RawClass::parse(&out);
	let code = parsed.method("list").code_bytes();
	assert_eq!(code.len(), 26);
	assert_eq!(code[12], 0xb8, "invokestatic tryCheck");
	assert_eq!(code[15], 0x99, "ifeq to denial block");
	assert_eq!(&code[20..22], &[0x01, 0xb0], "original body");
	assert_eq!(code[22], 0xb8, "invokestatic of the empty-list factory");
	assert_eq!(code[25], 0xb0, "areturn of the substitute");
}

#[test]
fn predicate_gated_denial_branches_back_to_the_body() {
	let mut cf = ClassFile::new("y/Y");
	cf.add_method(0x0001, "sensitive", "()I", CodeDef::new(1, 1, vec![0x08, 0xac]));
	let bytes = cf.build();

	let predicate = HandleInfo {
		kind: HandleKind::InvokeStatic,
		class: "app/Gatekeeper".into(),
		name: "permitted".into(),
		descriptor: "(Ljava/lang/Class;Ly/Y;)Z".into(),
	};
	let action = DenyAction::gated(predicate, DenyAction::Exception).unwrap();
	let rules = deny_target("y", "Y", "sensitive", action);
	let out = run(&bytes, &rules).expect("rewrite expected");

	let parsed = RawClass::parse(&out);
	let code = parsed.method("sensitive").code_bytes();

	// The predicate needs the caller, so the prelude stores and reloads it.
	assert_eq!(&code[6..8], &[0x4c, 0x2b], "astore_1; aload_1");
	assert_eq!(&code[20..22], &[0x08, 0xac], "original body");

	// Denial block: predicate handle, caller, receiver, invoke, then a
	// backward branch onto the body when the predicate permits.
	assert_eq!(code[22], 0x12, "predicate handle constant");
	assert_eq!(code[24], 0x2b, "caller reload");
	assert_eq!(code[25], 0x2a, "receiver load");
	assert_eq!(code[26], 0xb6, "MethodHandle.invoke");
	let ifne_at = 29;
	assert_eq!(code[ifne_at], 0x9a);
	let offset = common::u16be(code, ifne_at + 1) as i16 as i32;
	assert_eq!(offset, 20 - ifne_at as i32, "branches back to the body");
	assert_eq!(code[code.len() - 1], 0xbf, "denial still throws");

	// The backward merge target forced a stack-map table.
	assert!(find(&out, b"StackMapTable").is_some());
}

#[test]
fn handle_constant_hijack() {
	let mut cf = ClassFile::new("a/A");
	let foo = cf.method_ref("x/X", "foo", "()V");
	let handle = cf.method_handle(5, "x/X", "foo", "()V");
	let _ = handle;
	let bytes = cf.build();

	let rules = deny_target("x", "X", "foo", DenyAction::Exception);
	let out = run(&bytes, &rules).expect("rewrite expected");

	let mut original = vec![15, 5];
	original.extend_from_slice(&foo.to_be_bytes());
	let at = find(&bytes, &original).unwrap();

	// Patched in place: reference kind becomes invoke-static, the member
	// now points at the synthesized proxy.
	assert_eq!(out[at], 15);
	assert_eq!(out[at + 1], 6);
	let proxy_ref = u16be(&out, at + 2);
	assert_ne!(proxy_ref, foo);

	let parsed = RawClass::parse(&out);
	assert_eq!(parsed.methods_count, 1);
	let proxy = parsed.methods.iter().find(|m| m.name.starts_with("$p$")).unwrap();
	assert_eq!(proxy.descriptor, "(Lx/X;)V");
	// PLAIN proxy: load the receiver, forward, return.
	let mut expected = vec![0x2a, 0xb6];
	expected.extend_from_slice(&foo.to_be_bytes());
	expected.push(0xb1);
	assert_eq!(proxy.code_bytes(), &expected[..]);
}

#[test]
fn native_method_interception() {
	let mut cf = ClassFile::new("q/Q");
	cf.add_native(0x0001, "compute", "(I)I");
	let bytes = cf.build();

	let rules = deny_target("q", "Q", "compute", DenyAction::Exception);
	let out = run(&bytes, &rules).expect("rewrite expected");

	let parsed = RawClass::parse(&out);
	assert_eq!(parsed.methods_count, 2);

	let renamed = parsed.method("$native$compute");
	assert_eq!(renamed.flags & 0x0100, 0x0100, "stays native");
	assert_eq!(renamed.flags & 0x0002, 0x0002, "privatized");
	assert_eq!(renamed.flags & 0x1000, 0x1000, "synthetic");
	assert_eq!(renamed.flags & 0x0001, 0, "no longer public");
	assert_eq!(renamed.descriptor, "(I)I");
	assert!(renamed.code.is_none());

	let twin = parsed.method("compute");
	assert_eq!(twin.flags, 0x0001, "public, not native");
	let code = twin.code_bytes();
	assert_eq!(code[0], 0xb2, "check prelude first");
	// Forward: aload_0; iload_1; invokespecial renamed; ireturn.
	assert!(find(code, &[0x2a, 0x1b, 0xb7]).is_some());
	assert_eq!(code[code.len() - 1], 0xac);
}

#[test]
fn pc_bearing_attributes_shift() {
	let mut cf = ClassFile::new("y/Y");
	let mut code_def = CodeDef::new(1, 1, vec![0x08, 0xac]);
	code_def.exceptions.push([0, 2, 2, 0]);
	code_def.line_numbers.push((0, 10));
	cf.add_method(0x0001, "sensitive", "()I", code_def);
	let bytes = cf.build();

	let rules = deny_target("y", "Y", "sensitive", DenyAction::Exception);
	let out = run(&bytes, &rules).expect("rewrite expected");

	let parsed = RawClass::parse(&out);
	let body = parsed.method("sensitive").code.as_ref().unwrap();
	let code_len = common::u32be(body, 4) as usize;
	let mut at = 8 + code_len;

	let exceptions = u16be(body, at);
	at += 2;
	assert_eq!(exceptions, 1);
	assert_eq!(u16be(body, at), 16, "start pc shifted");
	assert_eq!(u16be(body, at + 2), 18, "end pc shifted");
	assert_eq!(u16be(body, at + 4), 18, "handler pc shifted");
	at += 8;

	let attributes = u16be(body, at);
	at += 2;
	assert_eq!(attributes, 1);
	at += 6; // attribute header
	assert_eq!(u16be(body, at), 1, "one line number entry");
	assert_eq!(u16be(body, at + 2), 16, "line pc shifted");
	assert_eq!(u16be(body, at + 4), 10, "line untouched");
}

#[test]
fn switch_alignment_survives_the_prelude() {
	// iload_0; tableswitch (2 pad bytes, default 19, low 0, high 0, one
	// case offset 19); iconst_0; ireturn
	let mut code = vec![0x1a, 0xaa, 0, 0];
	code.extend_from_slice(&19i32.to_be_bytes());
	code.extend_from_slice(&0i32.to_be_bytes());
	code.extend_from_slice(&0i32.to_be_bytes());
	code.extend_from_slice(&19i32.to_be_bytes());
	code.extend_from_slice(&[0x03, 0xac]);

	let mut cf = ClassFile::new("s/S");
	cf.add_method(0x0009, "pick", "(I)I", CodeDef::new(1, 1, code.clone()));
	let bytes = cf.build();

	let rules = deny_target("s", "S", "pick", DenyAction::Exception);
	let out = run(&bytes, &rules).expect("rewrite expected");

	let parsed = RawClass::parse(&out);
	let rewritten = parsed.method("pick").code_bytes();
	let delta = rewritten.len() - code.len();
	assert_eq!(delta % 4, 0, "prelude must not disturb switch padding");
	assert_eq!(&rewritten[delta..], &code[..], "body preserved verbatim");
	// The switch opcode's operands still start on a 4-byte boundary.
	let switch_pc = delta + 1;
	assert_eq!(rewritten[switch_pc], 0xaa);
	let operands_at = switch_pc + 1 + (3 - switch_pc % 4);
	assert_eq!(operands_at % 4, 0);
	assert_eq!(common::u32be(rewritten, operands_at), 19);
}

#[test]
fn oversized_descriptor_rejected() {
	let mut cf = ClassFile::new("a/A");
	let mut descriptor = String::from("(");
	for _ in 0..128 {
		descriptor.push('J');
	}
	descriptor.push_str(")V");
	let wide = cf.method_ref("x/X", "wide", &descriptor);
	let mut code = vec![0x01, 0xb6];
	code.extend_from_slice(&wide.to_be_bytes());
	code.push(0xb1);
	cf.add_method(0x0009, "bar", "()V", CodeDef::new(1, 0, code));
	let bytes = cf.build();

	let rules = deny_caller("x", "X", "wide", DenyAction::Exception);
	let err = transform(&bytes, &rules, &TargetRules::of(rules.clone()), &TransformOptions::default())
		.unwrap_err();
	assert!(matches!(err, TransformError::ClassTooLarge(_)));
}

#[test]
fn bad_magic_is_ignorable() {
	let rules = allow_all();
	let err = transform(
		&[0u8; 16],
		&rules,
		&TargetRules::of(rules.clone()),
		&TransformOptions::default(),
	)
	.unwrap_err();
	assert!(err.is_ignorable());
}

#[test]
fn old_class_version_is_ignorable() {
	let mut cf = ClassFile::new("a/A");
	cf.add_method(0x0009, "sum", "()I", CodeDef::new(1, 0, vec![0x05, 0xac]));
	let mut bytes = cf.build();
	bytes[6] = 0;
	bytes[7] = 48;

	let rules = deny_target("a", "A", "sum", DenyAction::Exception);
	let err = transform(&bytes, &rules, &TargetRules::of(rules.clone()), &TransformOptions::default())
		.unwrap_err();
	assert!(err.is_ignorable());
}
