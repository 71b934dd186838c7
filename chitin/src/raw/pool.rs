use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use chitin_derive::FromRepr;
use fxhash::FxHashMap;
use nohash_hasher::IntMap;
use rand::Rng;

use crate::errors::{Result, TransformError};
use crate::utilities::{decode_mutf8, encode_mutf8, Reader, Writer};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum ConstantTag {
	Utf8 = 1,
	Integer = 3,
	Float = 4,
	Long = 5,
	Double = 6,
	Class = 7,
	String = 8,
	FieldRef = 9,
	MethodRef = 10,
	InterfaceMethodRef = 11,
	NameAndType = 12,
	MethodHandle = 15,
	MethodType = 16,
	Dynamic = 17,
	InvokeDynamic = 18,
	Module = 19,
	Package = 20,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum HandleKind {
	GetField = 1,
	GetStatic = 2,
	PutField = 3,
	PutStatic = 4,
	InvokeVirtual = 5,
	InvokeStatic = 6,
	InvokeSpecial = 7,
	NewInvokeSpecial = 8,
	InvokeInterface = 9,
}

impl HandleKind {
	pub fn is_invocation(self) -> bool {
		matches!(
			self,
			Self::InvokeVirtual
				| Self::InvokeStatic
				| Self::InvokeSpecial
				| Self::NewInvokeSpecial
				| Self::InvokeInterface
		)
	}
}

/// Resolved member reference. Shared strings keep repeated lookups cheap
/// once an entry has been materialized.
#[derive(Debug, Clone)]
pub struct MemberRef {
	pub class: Rc<str>,
	pub name: Rc<str>,
	pub descriptor: Rc<str>,
	pub interface: bool,
}

/// A method-handle constant as found during the decode scan.
#[derive(Debug, Copy, Clone)]
pub struct HandleConstant {
	pub index: u16,
	/// Offset of the entry's tag byte within the class file.
	pub offset: usize,
	pub kind: HandleKind,
	pub member: u16,
}

#[derive(Debug)]
enum ExtConstant {
	Utf8(Box<str>),
	Integer(i32),
	Float(f32),
	Long(i64),
	Double(f64),
	Class(u16),
	Str(u16),
	NameAndType(u16, u16),
	Member(ConstantTag, u16, u16),
	Handle(HandleKind, u16),
	/// Filler for the second slot of a wide entry.
	Wide,
}

impl ExtConstant {
	fn tag(&self) -> ConstantTag {
		match self {
			Self::Utf8(_) => ConstantTag::Utf8,
			Self::Integer(_) => ConstantTag::Integer,
			Self::Float(_) => ConstantTag::Float,
			Self::Long(_) => ConstantTag::Long,
			Self::Double(_) => ConstantTag::Double,
			Self::Class(_) => ConstantTag::Class,
			Self::Str(_) => ConstantTag::String,
			Self::NameAndType(..) => ConstantTag::NameAndType,
			Self::Member(tag, ..) => *tag,
			Self::Handle(..) => ConstantTag::MethodHandle,
			Self::Wide => ConstantTag::Long,
		}
	}
}

/// Structural identity of a pool entry: the entry kind plus the values of
/// every transitively referenced entry.
#[derive(Debug, Hash, Eq, PartialEq)]
enum PoolKey {
	Utf8(Box<str>),
	Integer(i32),
	Float(u32),
	Long(i64),
	Double(u64),
	Class(Box<str>),
	Str(Box<str>),
	NameAndType(Box<str>, Box<str>),
	Member(u8, Box<str>, Box<str>, Box<str>),
	Handle(u8, u8, Box<str>, Box<str>, Box<str>),
}

#[derive(Default)]
struct PoolExtension {
	bytes: Writer,
	entries: Vec<ExtConstant>,
	dedup: FxHashMap<PoolKey, u16>,
}

/// Index over the constant pool of one class file: a single decode scan
/// records entry offsets, later additions append past the original count.
pub struct ConstantPool<'l> {
	data: &'l [u8],
	offsets: Vec<u32>,
	count: u16,
	end: usize,
	handles: Vec<HandleConstant>,
	members: RefCell<IntMap<u16, MemberRef>>,
	ext: Option<Box<PoolExtension>>,
}

impl<'l> ConstantPool<'l> {
	/// Decode scan. The reader must sit at the constant-pool count field.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub(crate) fn parse(reader: &mut Reader<'l>, data: &'l [u8]) -> Result<Self> {
		let count = reader.u16()?;
		if count == 0 {
			return Err(TransformError::malformed("empty constant pool"));
		}

		let mut offsets = vec![0u32; count as usize];
		let mut handles = Vec::new();
		let mut index = 1u16;
		while index < count {
			let offset = reader.pos();
			let tag = ConstantTag::from_repr(reader.u8()?)
				.ok_or_else(|| TransformError::malformed("unknown constant tag"))?;
			offsets[index as usize] = offset as u32;

			match tag {
				ConstantTag::Utf8 => {
					let length = reader.u16()? as usize;
					reader.skip(length)?;
				}
				ConstantTag::Integer | ConstantTag::Float => reader.skip(4)?,
				ConstantTag::Long | ConstantTag::Double => {
					reader.skip(8)?;
					if index.checked_add(1).map_or(true, |next| next >= count) {
						return Err(TransformError::malformed("wide constant at end of pool"));
					}
					index += 1;
				}
				ConstantTag::Class
				| ConstantTag::String
				| ConstantTag::MethodType
				| ConstantTag::Module
				| ConstantTag::Package => reader.skip(2)?,
				ConstantTag::FieldRef
				| ConstantTag::MethodRef
				| ConstantTag::InterfaceMethodRef
				| ConstantTag::NameAndType
				| ConstantTag::Dynamic
				| ConstantTag::InvokeDynamic => reader.skip(4)?,
				ConstantTag::MethodHandle => {
					let kind = HandleKind::from_repr(reader.u8()?)
						.ok_or_else(|| TransformError::malformed("unknown method-handle kind"))?;
					let member = reader.u16()?;
					handles.push(HandleConstant { index, offset, kind, member });
				}
			}
			index += 1;
		}

		Ok(Self {
			data,
			offsets,
			count,
			end: reader.pos(),
			handles,
			members: RefCell::new(IntMap::default()),
			ext: None,
		})
	}

	/// Offset just past the original pool bytes.
	pub(crate) fn end(&self) -> usize {
		self.end
	}

	/// Slot count the pool header will carry after extension.
	pub(crate) fn total_count(&self) -> u16 {
		self.count + self.ext.as_ref().map_or(0, |e| e.entries.len() as u16)
	}

	pub(crate) fn growth(&self) -> usize {
		self.ext.as_ref().map_or(0, |e| e.bytes.len())
	}

	pub(crate) fn is_extended(&self) -> bool {
		self.growth() > 0
	}

	pub(crate) fn extension_bytes(&self) -> &[u8] {
		self.ext.as_ref().map_or(&[], |e| e.bytes.as_slice())
	}

	pub(crate) fn handle_constants(&self) -> &[HandleConstant] {
		&self.handles
	}

	fn next_index(&self) -> u16 {
		self.total_count()
	}

	fn ext_entry(&self, index: u16) -> Result<&ExtConstant> {
		let slot = (index as usize)
			.checked_sub(self.count as usize)
			.and_then(|i| self.ext.as_ref()?.entries.get(i));
		slot.ok_or_else(|| TransformError::malformed("constant index out of range"))
	}

	/// Reader positioned just past the tag byte of an original entry.
	pub(crate) fn entry_reader(&self, index: u16) -> Result<Reader<'l>> {
		let offset = self
			.offsets
			.get(index as usize)
			.copied()
			.filter(|o| *o != 0)
			.ok_or_else(|| TransformError::malformed("constant index out of range"))?;
		Ok(Reader::at(self.data, offset as usize + 1))
	}

	pub fn tag_at(&self, index: u16) -> Result<ConstantTag> {
		if index >= self.count {
			return match self.ext_entry(index)? {
				ExtConstant::Wide => Err(TransformError::malformed("constant index out of range")),
				entry => Ok(entry.tag()),
			};
		}
		let offset = self
			.offsets
			.get(index as usize)
			.copied()
			.filter(|o| *o != 0)
			.ok_or_else(|| TransformError::malformed("constant index out of range"))?;
		ConstantTag::from_repr(self.data[offset as usize])
			.ok_or_else(|| TransformError::malformed("unknown constant tag"))
	}

	fn expect_tag(&self, index: u16, expected: &[ConstantTag]) -> Result<ConstantTag> {
		let tag = self.tag_at(index)?;
		if expected.contains(&tag) {
			Ok(tag)
		} else {
			Err(TransformError::malformed("constant entry has incompatible kind"))
		}
	}

	pub fn utf8(&self, index: u16) -> Result<Cow<'_, str>> {
		self.expect_tag(index, &[ConstantTag::Utf8])?;
		if index >= self.count {
			match self.ext_entry(index)? {
				ExtConstant::Utf8(text) => return Ok(Cow::Borrowed(text)),
				_ => return Err(TransformError::Internal("extension entry tag mismatch")),
			}
		}
		let mut reader = self.entry_reader(index)?;
		let length = reader.u16()? as usize;
		decode_mutf8(reader.bytes(length)?)
	}

	pub fn class_name(&self, index: u16) -> Result<Cow<'_, str>> {
		self.expect_tag(index, &[ConstantTag::Class])?;
		let name_index = if index >= self.count {
			match self.ext_entry(index)? {
				ExtConstant::Class(name) => *name,
				_ => return Err(TransformError::Internal("extension entry tag mismatch")),
			}
		} else {
			self.entry_reader(index)?.u16()?
		};
		self.utf8(name_index)
	}

	pub fn name_and_type(&self, index: u16) -> Result<(Cow<'_, str>, Cow<'_, str>)> {
		self.expect_tag(index, &[ConstantTag::NameAndType])?;
		let (name_index, descriptor_index) = if index >= self.count {
			match self.ext_entry(index)? {
				ExtConstant::NameAndType(name, descriptor) => (*name, *descriptor),
				_ => return Err(TransformError::Internal("extension entry tag mismatch")),
			}
		} else {
			let mut reader = self.entry_reader(index)?;
			(reader.u16()?, reader.u16()?)
		};
		Ok((self.utf8(name_index)?, self.utf8(descriptor_index)?))
	}

	/// Typed resolution of a field/method/interface-method reference,
	/// memoized on first access.
	pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
		if let Some(member) = self.members.borrow().get(&index) {
			return Ok(member.clone());
		}

		let tag = self.expect_tag(
			index,
			&[ConstantTag::FieldRef, ConstantTag::MethodRef, ConstantTag::InterfaceMethodRef],
		)?;
		let (class_index, nat_index) = if index >= self.count {
			match self.ext_entry(index)? {
				ExtConstant::Member(_, class, nat) => (*class, *nat),
				_ => return Err(TransformError::Internal("extension entry tag mismatch")),
			}
		} else {
			let mut reader = self.entry_reader(index)?;
			(reader.u16()?, reader.u16()?)
		};

		let class = self.class_name(class_index)?;
		let (name, descriptor) = self.name_and_type(nat_index)?;
		let member = MemberRef {
			class: Rc::from(class.as_ref()),
			name: Rc::from(name.as_ref()),
			descriptor: Rc::from(descriptor.as_ref()),
			interface: tag == ConstantTag::InterfaceMethodRef,
		};
		self.members.borrow_mut().insert(index, member.clone());
		Ok(member)
	}

	pub fn method_handle(&self, index: u16) -> Result<(HandleKind, u16)> {
		self.expect_tag(index, &[ConstantTag::MethodHandle])?;
		if index >= self.count {
			match self.ext_entry(index)? {
				ExtConstant::Handle(kind, member) => return Ok((*kind, *member)),
				_ => return Err(TransformError::Internal("extension entry tag mismatch")),
			}
		}
		let mut reader = self.entry_reader(index)?;
		let kind = HandleKind::from_repr(reader.u8()?)
			.ok_or_else(|| TransformError::malformed("unknown method-handle kind"))?;
		Ok((kind, reader.u16()?))
	}

	// ---- extension ----------------------------------------------------

	/// Structural key of an existing entry, or `None` for kinds the
	/// rewriter never appends.
	fn key_of(&self, index: u16) -> Result<Option<PoolKey>> {
		let key = match self.tag_at(index)? {
			ConstantTag::Utf8 => PoolKey::Utf8(self.utf8(index)?.into()),
			ConstantTag::Integer => PoolKey::Integer(self.entry_reader(index)?.i32()?),
			ConstantTag::Float => PoolKey::Float(self.entry_reader(index)?.u32()?),
			ConstantTag::Long => {
				let mut reader = self.entry_reader(index)?;
				let high = reader.u32()? as u64;
				let low = reader.u32()? as u64;
				PoolKey::Long(((high << 32) | low) as i64)
			}
			ConstantTag::Double => {
				let mut reader = self.entry_reader(index)?;
				let high = reader.u32()? as u64;
				let low = reader.u32()? as u64;
				PoolKey::Double((high << 32) | low)
			}
			ConstantTag::Class => PoolKey::Class(self.class_name(index)?.into()),
			ConstantTag::String => {
				let text = self.utf8(self.entry_reader(index)?.u16()?)?;
				PoolKey::Str(text.into())
			}
			ConstantTag::NameAndType => {
				let (name, descriptor) = self.name_and_type(index)?;
				PoolKey::NameAndType(name.into(), descriptor.into())
			}
			tag @ (ConstantTag::FieldRef | ConstantTag::MethodRef | ConstantTag::InterfaceMethodRef) => {
				let member = self.member_ref(index)?;
				PoolKey::Member(
					tag as u8,
					member.class.as_ref().into(),
					member.name.as_ref().into(),
					member.descriptor.as_ref().into(),
				)
			}
			ConstantTag::MethodHandle => {
				let (kind, member_index) = self.method_handle(index)?;
				let member_tag = self.tag_at(member_index)? as u8;
				let member = self.member_ref(member_index)?;
				PoolKey::Handle(
					kind as u8,
					member_tag,
					member.class.as_ref().into(),
					member.name.as_ref().into(),
					member.descriptor.as_ref().into(),
				)
			}
			_ => return Ok(None),
		};
		Ok(Some(key))
	}

	/// First mutation resolves every existing entry so structurally equal
	/// additions intern onto the original pool.
	fn ensure_ext(&mut self) -> Result<()> {
		if self.ext.is_some() {
			return Ok(());
		}

		let mut dedup = FxHashMap::default();
		let mut index = 1u16;
		while index < self.count {
			if self.offsets[index as usize] != 0 {
				if let Some(key) = self.key_of(index)? {
					dedup.entry(key).or_insert(index);
				}
			}
			index += 1;
		}

		self.ext = Some(Box::new(PoolExtension { dedup, ..Default::default() }));
		Ok(())
	}

	fn append(&mut self, key: PoolKey, entry: ExtConstant, wide: bool) -> Result<u16> {
		let index = self.next_index();
		let width = if wide { 2u16 } else { 1 };
		if index as u32 + width as u32 > u16::MAX as u32 {
			return Err(TransformError::ClassTooLarge("constant pool"));
		}

		let ext = self.ext.as_mut().ok_or(TransformError::Internal("pool extension missing"))?;
		match &entry {
			ExtConstant::Utf8(text) => {
				let encoded = encode_mutf8(text);
				if encoded.len() > u16::MAX as usize {
					return Err(TransformError::ClassTooLarge("utf8 constant"));
				}
				ext.bytes.u8(ConstantTag::Utf8 as u8);
				ext.bytes.u16(encoded.len() as u16);
				ext.bytes.bytes(&encoded);
			}
			ExtConstant::Integer(value) => {
				ext.bytes.u8(ConstantTag::Integer as u8);
				ext.bytes.u32(*value as u32);
			}
			ExtConstant::Float(value) => {
				ext.bytes.u8(ConstantTag::Float as u8);
				ext.bytes.u32(value.to_bits());
			}
			ExtConstant::Long(value) => {
				ext.bytes.u8(ConstantTag::Long as u8);
				ext.bytes.u64(*value as u64);
			}
			ExtConstant::Double(value) => {
				ext.bytes.u8(ConstantTag::Double as u8);
				ext.bytes.u64(value.to_bits());
			}
			ExtConstant::Class(name) => {
				ext.bytes.u8(ConstantTag::Class as u8);
				ext.bytes.u16(*name);
			}
			ExtConstant::Str(utf8) => {
				ext.bytes.u8(ConstantTag::String as u8);
				ext.bytes.u16(*utf8);
			}
			ExtConstant::NameAndType(name, descriptor) => {
				ext.bytes.u8(ConstantTag::NameAndType as u8);
				ext.bytes.u16(*name);
				ext.bytes.u16(*descriptor);
			}
			ExtConstant::Member(tag, class, nat) => {
				ext.bytes.u8(*tag as u8);
				ext.bytes.u16(*class);
				ext.bytes.u16(*nat);
			}
			ExtConstant::Handle(kind, member) => {
				ext.bytes.u8(ConstantTag::MethodHandle as u8);
				ext.bytes.u8(*kind as u8);
				ext.bytes.u16(*member);
			}
			ExtConstant::Wide => return Err(TransformError::Internal("wide filler added directly")),
		}

		ext.entries.push(entry);
		if wide {
			ext.entries.push(ExtConstant::Wide);
		}
		ext.dedup.insert(key, index);
		Ok(index)
	}

	fn intern(&mut self, key: PoolKey, build: impl FnOnce(&mut Self) -> Result<(ExtConstant, bool)>) -> Result<u16> {
		self.ensure_ext()?;
		if let Some(index) = self.ext.as_ref().and_then(|e| e.dedup.get(&key)) {
			return Ok(*index);
		}
		let (entry, wide) = build(self)?;
		self.append(key, entry, wide)
	}

	pub fn add_utf8(&mut self, text: &str) -> Result<u16> {
		self.intern(PoolKey::Utf8(text.into()), |_| Ok((ExtConstant::Utf8(text.into()), false)))
	}

	pub fn add_integer(&mut self, value: i32) -> Result<u16> {
		self.intern(PoolKey::Integer(value), |_| Ok((ExtConstant::Integer(value), false)))
	}

	pub fn add_float(&mut self, value: f32) -> Result<u16> {
		self.intern(PoolKey::Float(value.to_bits()), |_| Ok((ExtConstant::Float(value), false)))
	}

	pub fn add_long(&mut self, value: i64) -> Result<u16> {
		self.intern(PoolKey::Long(value), |_| Ok((ExtConstant::Long(value), true)))
	}

	pub fn add_double(&mut self, value: f64) -> Result<u16> {
		self.intern(PoolKey::Double(value.to_bits()), |_| Ok((ExtConstant::Double(value), true)))
	}

	pub fn add_class(&mut self, name: &str) -> Result<u16> {
		self.intern(PoolKey::Class(name.into()), |pool| {
			let utf8 = pool.add_utf8(name)?;
			Ok((ExtConstant::Class(utf8), false))
		})
	}

	pub fn add_string(&mut self, text: &str) -> Result<u16> {
		self.intern(PoolKey::Str(text.into()), |pool| {
			let utf8 = pool.add_utf8(text)?;
			Ok((ExtConstant::Str(utf8), false))
		})
	}

	pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
		self.intern(PoolKey::NameAndType(name.into(), descriptor.into()), |pool| {
			let name = pool.add_utf8(name)?;
			let descriptor = pool.add_utf8(descriptor)?;
			Ok((ExtConstant::NameAndType(name, descriptor), false))
		})
	}

	pub fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
		self.add_member(ConstantTag::MethodRef, class, name, descriptor)
	}

	pub fn add_interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
		self.add_member(ConstantTag::InterfaceMethodRef, class, name, descriptor)
	}

	pub fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
		self.add_member(ConstantTag::FieldRef, class, name, descriptor)
	}

	fn add_member(&mut self, tag: ConstantTag, class: &str, name: &str, descriptor: &str) -> Result<u16> {
		let key = PoolKey::Member(tag as u8, class.into(), name.into(), descriptor.into());
		self.intern(key, |pool| {
			let class = pool.add_class(class)?;
			let nat = pool.add_name_and_type(name, descriptor)?;
			Ok((ExtConstant::Member(tag, class, nat), false))
		})
	}

	pub fn add_method_handle(&mut self, kind: HandleKind, member_index: u16) -> Result<u16> {
		let member_tag = self.tag_at(member_index)? as u8;
		let member = self.member_ref(member_index)?;
		let key = PoolKey::Handle(
			kind as u8,
			member_tag,
			member.class.as_ref().into(),
			member.name.as_ref().into(),
			member.descriptor.as_ref().into(),
		);
		self.intern(key, |_| Ok((ExtConstant::Handle(kind, member_index), false)))
	}

	/// Fresh method name of the form `$<prefix>$<digits>`, guaranteed to be
	/// absent from the pool. The digit count grows until a free name is hit.
	pub(crate) fn synthetic_method_name(&mut self, prefix: &str) -> Result<String> {
		self.ensure_ext()?;
		let mut rng = rand::thread_rng();
		let mut bound = 10_000u64;
		loop {
			let name = format!("${prefix}${}", rng.gen_range(0..bound));
			let taken = self
				.ext
				.as_ref()
				.map_or(false, |e| e.dedup.contains_key(&PoolKey::Utf8(name.as_str().into())));
			if !taken {
				return Ok(name);
			}
			bound = bound.saturating_mul(10);
		}
	}
}

/// Descriptor of a proxy standing in for an instance operation: the owning
/// class becomes the first parameter.
pub(crate) fn instance_proxy_descriptor(owner: &str, descriptor: &str) -> Result<String> {
	let rest = descriptor
		.strip_prefix('(')
		.ok_or_else(|| TransformError::malformed("invalid method descriptor"))?;
	Ok(format!("({}{rest}", class_type_descriptor(owner)))
}

/// Descriptor of a proxy standing in for a constructor: same parameters,
/// but the freshly constructed instance becomes the return type.
pub(crate) fn constructor_proxy_descriptor(owner: &str, descriptor: &str) -> Result<String> {
	let params = descriptor
		.strip_suffix('V')
		.filter(|rest| rest.ends_with(')'))
		.ok_or_else(|| TransformError::malformed("constructor descriptor must return void"))?;
	Ok(format!("{params}{}", class_type_descriptor(owner)))
}

pub(crate) fn class_type_descriptor(name: &str) -> Cow<'_, str> {
	if name.starts_with('[') {
		Cow::Borrowed(name)
	} else {
		Cow::Owned(format!("L{name};"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_pool() -> Vec<u8> {
		// count = 8: Utf8 "foo", Utf8 "()V", Class #1, NameAndType #1 #2,
		// MethodRef #3 #4, Long 5 (two slots).
		let mut w = Writer::new();
		w.u16(8);
		w.u8(1);
		w.u16(3);
		w.bytes(b"foo");
		w.u8(1);
		w.u16(3);
		w.bytes(b"()V");
		w.u8(7);
		w.u16(1);
		w.u8(12);
		w.u16(1);
		w.u16(2);
		w.u8(10);
		w.u16(3);
		w.u16(4);
		w.u8(5);
		w.u64(5);
		w.into_vec()
	}

	fn parse(data: &[u8]) -> ConstantPool<'_> {
		let mut reader = Reader::new(data);
		ConstantPool::parse(&mut reader, data).unwrap()
	}

	#[test]
	fn decodes_and_resolves() {
		let data = sample_pool();
		let pool = parse(&data);
		assert_eq!(pool.tag_at(5).unwrap(), ConstantTag::MethodRef);
		let member = pool.member_ref(5).unwrap();
		assert_eq!(&*member.class, "foo");
		assert_eq!(&*member.name, "foo");
		assert_eq!(&*member.descriptor, "()V");
		// Second slot of the wide entry is unusable.
		assert_eq!(pool.tag_at(6).unwrap(), ConstantTag::Long);
		assert!(pool.tag_at(7).is_err());
	}

	#[test]
	fn extension_dedups_against_existing() {
		let data = sample_pool();
		let mut pool = parse(&data);
		assert_eq!(pool.add_utf8("foo").unwrap(), 1);
		assert_eq!(pool.add_class("foo").unwrap(), 3);
		assert_eq!(pool.add_method_ref("foo", "foo", "()V").unwrap(), 5);
		assert_eq!(pool.add_long(5).unwrap(), 6);
		assert!(!pool.is_extended());
	}

	#[test]
	fn extension_appends_contiguously() {
		let data = sample_pool();
		let mut pool = parse(&data);
		let first = pool.add_utf8("bar").unwrap();
		assert_eq!(first, 8);
		let long = pool.add_long(9).unwrap();
		assert_eq!(long, 9);
		// Wide entry reserved an index gap.
		let next = pool.add_utf8("baz").unwrap();
		assert_eq!(next, 11);
		assert_eq!(pool.total_count(), 12);
		assert_eq!(pool.utf8(11).unwrap(), "baz");
		assert_eq!(pool.tag_at(9).unwrap(), ConstantTag::Long);
		assert!(pool.tag_at(10).is_err());
		// Interning the same text again returns the same handle.
		assert_eq!(pool.add_utf8("bar").unwrap(), 8);
	}

	#[test]
	fn ext_member_resolution() {
		let data = sample_pool();
		let mut pool = parse(&data);
		let member = pool.add_method_ref("a/B", "run", "(I)J").unwrap();
		let resolved = pool.member_ref(member).unwrap();
		assert_eq!(&*resolved.class, "a/B");
		assert_eq!(&*resolved.descriptor, "(I)J");
	}

	#[test]
	fn proxy_descriptors() {
		assert_eq!(instance_proxy_descriptor("x/Y", "(IJ)V").unwrap(), "(Lx/Y;IJ)V");
		assert_eq!(instance_proxy_descriptor("[I", "()I").unwrap(), "([I)I");
		assert_eq!(constructor_proxy_descriptor("x/Y", "(I)V").unwrap(), "(I)Lx/Y;");
		assert!(constructor_proxy_descriptor("x/Y", "(I)J").is_err());
	}

	#[test]
	fn growth_past_slot_limit_fails() {
		// Pool already holding 65533 integer entries; the count field says
		// 65534, so two more slots overflow the 16-bit limit.
		let mut w = Writer::new();
		w.u16(65534);
		for i in 0..65533u32 {
			w.u8(3);
			w.u32(i);
		}
		let data = w.into_vec();
		let mut pool = parse(&data);

		assert_eq!(pool.add_utf8("one more").unwrap(), 65534);
		assert!(matches!(pool.add_utf8("too many"), Err(TransformError::ClassTooLarge(_))));
		assert!(matches!(pool.add_long(1 << 40), Err(TransformError::ClassTooLarge(_))));
	}

	#[test]
	fn synthetic_names_are_fresh() {
		let data = sample_pool();
		let mut pool = parse(&data);
		let name = pool.synthetic_method_name("p").unwrap();
		assert!(name.starts_with("$p$"));
		pool.add_utf8(&name).unwrap();
		let other = pool.synthetic_method_name("p").unwrap();
		assert_ne!(name, other);
	}
}
