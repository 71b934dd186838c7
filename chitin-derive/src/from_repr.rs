use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Error, Type, parse_quote, spanned::Spanned};

pub fn derive(tokens: TokenStream) -> syn::Result<TokenStream> {
	let input: DeriveInput = syn::parse2(tokens)?;

	let Data::Enum(data) = &input.data else {
		return Err(Error::new(input.ident.span(), "FromRepr only supports enums"));
	};

	if !input.generics.params.is_empty() {
		return Err(Error::new(input.generics.span(), "FromRepr does not support generics"));
	}

	let mut repr: Type = parse_quote!(usize);
	for attr in &input.attrs {
		if attr.path().is_ident("repr") {
			repr = attr.parse_args()?;
		}
	}

	let mut arms = Vec::with_capacity(data.variants.len());
	for variant in &data.variants {
		if !matches!(variant.fields, syn::Fields::Unit) {
			return Err(Error::new(variant.ident.span(), "FromRepr requires fieldless variants"));
		}
		let Some((_, discriminant)) = &variant.discriminant else {
			return Err(Error::new(variant.ident.span(), "FromRepr requires explicit discriminants"));
		};
		let name = &variant.ident;
		arms.push(quote! { v if v == #discriminant => Some(Self::#name), });
	}

	let ident = &input.ident;
	Ok(quote! {
		impl #ident {
			pub(crate) fn from_repr(discriminant: #repr) -> Option<Self> {
				match discriminant {
					#(#arms)*
					_ => None,
				}
			}
		}
	})
}
