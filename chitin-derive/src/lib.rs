mod from_repr;

use proc_macro::TokenStream;

#[proc_macro_derive(FromRepr)]
pub fn derive_from_repr(input: TokenStream) -> TokenStream {
	from_repr::derive(input.into())
		.unwrap_or_else(|err| err.into_compile_error())
		.into()
}
