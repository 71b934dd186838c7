//! Minimal class-file construction and inspection helpers for the
//! integration tests. The builder emits just enough of the format to
//! exercise the transformer; the parser reads transformer output back.

use std::collections::HashMap;

pub fn u16be(bytes: &[u8], at: usize) -> u16 {
	u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

pub fn u32be(bytes: &[u8], at: usize) -> u32 {
	u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// First occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
	haystack.windows(needle.len()).position(|window| window == needle)
}

#[derive(Default)]
struct TestPool {
	entries: Vec<Vec<u8>>,
	slots: u16,
	dedup: HashMap<Vec<u8>, u16>,
}

impl TestPool {
	fn push(&mut self, encoded: Vec<u8>, wide: bool) -> u16 {
		if let Some(index) = self.dedup.get(&encoded) {
			return *index;
		}
		let index = self.slots + 1;
		self.slots += if wide { 2 } else { 1 };
		self.dedup.insert(encoded.clone(), index);
		self.entries.push(encoded);
		index
	}

	fn utf8(&mut self, text: &str) -> u16 {
		let mut bytes = vec![1];
		bytes.extend_from_slice(&(text.len() as u16).to_be_bytes());
		bytes.extend_from_slice(text.as_bytes());
		self.push(bytes, false)
	}

	fn class(&mut self, name: &str) -> u16 {
		let name = self.utf8(name);
		let mut bytes = vec![7];
		bytes.extend_from_slice(&name.to_be_bytes());
		self.push(bytes, false)
	}

	fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
		let name = self.utf8(name);
		let descriptor = self.utf8(descriptor);
		let mut bytes = vec![12];
		bytes.extend_from_slice(&name.to_be_bytes());
		bytes.extend_from_slice(&descriptor.to_be_bytes());
		self.push(bytes, false)
	}

	fn member(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
		let class = self.class(class);
		let nat = self.name_and_type(name, descriptor);
		let mut bytes = vec![tag];
		bytes.extend_from_slice(&class.to_be_bytes());
		bytes.extend_from_slice(&nat.to_be_bytes());
		self.push(bytes, false)
	}

	fn method_handle(&mut self, kind: u8, member: u16) -> u16 {
		let mut bytes = vec![15, kind];
		bytes.extend_from_slice(&member.to_be_bytes());
		self.push(bytes, false)
	}
}

pub struct CodeDef {
	pub max_stack: u16,
	pub max_locals: u16,
	pub code: Vec<u8>,
	pub exceptions: Vec<[u16; 4]>,
	pub line_numbers: Vec<(u16, u16)>,
}

impl CodeDef {
	pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
		Self { max_stack, max_locals, code, exceptions: Vec::new(), line_numbers: Vec::new() }
	}
}

struct MethodDef {
	flags: u16,
	name: u16,
	descriptor: u16,
	code: Option<CodeDef>,
}

/// Builder for one synthetic class file, major version 52.
pub struct ClassFile {
	pool: TestPool,
	this_class: u16,
	super_class: u16,
	methods: Vec<MethodDef>,
}

impl ClassFile {
	pub fn new(name: &str) -> Self {
		let mut pool = TestPool::default();
		let this_class = pool.class(name);
		let super_class = pool.class("java/lang/Object");
		Self { pool, this_class, super_class, methods: Vec::new() }
	}

	pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
		self.pool.member(10, class, name, descriptor)
	}

	pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
		self.pool.member(11, class, name, descriptor)
	}

	pub fn method_handle(&mut self, kind: u8, class: &str, name: &str, descriptor: &str) -> u16 {
		let member = self.method_ref(class, name, descriptor);
		self.pool.method_handle(kind, member)
	}

	pub fn add_method(&mut self, flags: u16, name: &str, descriptor: &str, code: CodeDef) {
		let name = self.pool.utf8(name);
		let descriptor = self.pool.utf8(descriptor);
		self.methods.push(MethodDef { flags, name, descriptor, code: Some(code) });
	}

	pub fn add_native(&mut self, flags: u16, name: &str, descriptor: &str) {
		let name = self.pool.utf8(name);
		let descriptor = self.pool.utf8(descriptor);
		self.methods.push(MethodDef { flags: flags | 0x0100, name, descriptor, code: None });
	}

	pub fn build(mut self) -> Vec<u8> {
		let code_name = self.pool.utf8("Code");
		let line_name = self.pool.utf8("LineNumberTable");

		let mut out = Vec::new();
		out.extend_from_slice(&0xcafe_babeu32.to_be_bytes());
		out.extend_from_slice(&[0, 0, 0, 52]);
		out.extend_from_slice(&(self.pool.slots + 1).to_be_bytes());
		for entry in &self.pool.entries {
			out.extend_from_slice(entry);
		}
		out.extend_from_slice(&0x0021u16.to_be_bytes());
		out.extend_from_slice(&self.this_class.to_be_bytes());
		out.extend_from_slice(&self.super_class.to_be_bytes());
		out.extend_from_slice(&[0, 0]); // interfaces
		out.extend_from_slice(&[0, 0]); // fields

		out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
		for method in &self.methods {
			out.extend_from_slice(&method.flags.to_be_bytes());
			out.extend_from_slice(&method.name.to_be_bytes());
			out.extend_from_slice(&method.descriptor.to_be_bytes());
			match &method.code {
				None => out.extend_from_slice(&[0, 0]),
				Some(code) => {
					out.extend_from_slice(&[0, 1]);
					out.extend_from_slice(&code_name.to_be_bytes());

					let mut body = Vec::new();
					body.extend_from_slice(&code.max_stack.to_be_bytes());
					body.extend_from_slice(&code.max_locals.to_be_bytes());
					body.extend_from_slice(&(code.code.len() as u32).to_be_bytes());
					body.extend_from_slice(&code.code);
					body.extend_from_slice(&(code.exceptions.len() as u16).to_be_bytes());
					for entry in &code.exceptions {
						for pc in entry {
							body.extend_from_slice(&pc.to_be_bytes());
						}
					}
					if code.line_numbers.is_empty() {
						body.extend_from_slice(&[0, 0]);
					} else {
						body.extend_from_slice(&[0, 1]);
						body.extend_from_slice(&line_name.to_be_bytes());
						let length = 2 + code.line_numbers.len() as u32 * 4;
						body.extend_from_slice(&length.to_be_bytes());
						body.extend_from_slice(&(code.line_numbers.len() as u16).to_be_bytes());
						for (pc, line) in &code.line_numbers {
							body.extend_from_slice(&pc.to_be_bytes());
							body.extend_from_slice(&line.to_be_bytes());
						}
					}

					out.extend_from_slice(&(body.len() as u32).to_be_bytes());
					out.extend_from_slice(&body);
				}
			}
		}
		out.extend_from_slice(&[0, 0]); // class attributes
		out
	}
}

// ---- read side --------------------------------------------------------

pub struct RawMethod {
	pub flags: u16,
	pub name: String,
	pub descriptor: String,
	/// Code attribute body, when present.
	pub code: Option<Vec<u8>>,
}

impl RawMethod {
	pub fn code_bytes(&self) -> &[u8] {
		let body = self.code.as_ref().expect("method has no code");
		let length = u32be(body, 4) as usize;
		&body[8..8 + length]
	}

	pub fn max_stack(&self) -> u16 {
		u16be(self.code.as_ref().expect("method has no code"), 0)
	}
}

pub struct RawClass {
	pub pool_offsets: Vec<usize>,
	pub pool_end: usize,
	pub methods_count: u16,
	pub methods: Vec<RawMethod>,
}

impl RawClass {
	pub fn parse(bytes: &[u8]) -> RawClass {
		assert_eq!(u32be(bytes, 0), 0xcafe_babe);
		let count = u16be(bytes, 8);
		let mut pool_offsets = vec![0usize; count as usize];
		let mut at = 10usize;
		let mut index = 1u16;
		while index < count {
			pool_offsets[index as usize] = at;
			let tag = bytes[at];
			at += 1 + match tag {
				1 => 2 + u16be(bytes, at + 1) as usize,
				3 | 4 => 4,
				5 | 6 => {
					index += 1;
					8
				}
				7 | 8 | 16 | 19 | 20 => 2,
				9 | 10 | 11 | 12 | 17 | 18 => 4,
				15 => 3,
				other => panic!("unexpected constant tag {other}"),
			};
			index += 1;
		}
		let pool_end = at;

		at += 2; // access flags
		at += 2; // this
		at += 2; // super
		let interfaces = u16be(bytes, at);
		at += 2 + interfaces as usize * 2;
		let fields = u16be(bytes, at);
		at += 2;
		for _ in 0..fields {
			at += 6;
			let attributes = u16be(bytes, at);
			at += 2;
			for _ in 0..attributes {
				let length = u32be(bytes, at + 2) as usize;
				at += 6 + length;
			}
		}

		let methods_count = u16be(bytes, at);
		at += 2;
		let utf8 = |index: u16| -> String {
			let offset = pool_offsets[index as usize];
			assert_eq!(bytes[offset], 1);
			let length = u16be(bytes, offset + 1) as usize;
			String::from_utf8(bytes[offset + 3..offset + 3 + length].to_vec()).unwrap()
		};

		let mut methods = Vec::new();
		for _ in 0..methods_count {
			let flags = u16be(bytes, at);
			let name = utf8(u16be(bytes, at + 2));
			let descriptor = utf8(u16be(bytes, at + 4));
			let attributes = u16be(bytes, at + 6);
			at += 8;
			let mut code = None;
			for _ in 0..attributes {
				let attr_name = utf8(u16be(bytes, at));
				let length = u32be(bytes, at + 2) as usize;
				if attr_name == "Code" {
					code = Some(bytes[at + 6..at + 6 + length].to_vec());
				}
				at += 6 + length;
			}
			methods.push(RawMethod { flags, name, descriptor, code });
		}

		RawClass { pool_offsets, pool_end, methods_count, methods }
	}

	pub fn method(&self, name: &str) -> &RawMethod {
		self.methods.iter().find(|m| m.name == name).unwrap_or_else(|| panic!("no method {name}"))
	}
}
