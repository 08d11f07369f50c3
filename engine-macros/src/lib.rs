//! Procedural macros for defining arvo filters and tests with a declarative
//! registration footprint, mirroring the `#[builtin]` attribute macro this
//! crate's sibling `lisp-llm-sandbox` interpreter uses for its builtin
//! functions: the attribute extracts a name, keeps the annotated function
//! untouched, and emits a `register_*` function that binds it into a
//! registry under that name.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Ident, ItemFn, LitStr, Token};

struct NameArg {
    name: LitStr,
}

impl syn::parse::Parse for NameArg {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let ident: Ident = input.parse()?;
        if ident != "name" {
            return Err(syn::Error::new(ident.span(), "expected `name = \"...\"`"));
        }
        input.parse::<Token![=]>()?;
        let name: LitStr = input.parse()?;
        Ok(NameArg { name })
    }
}

/// Registers a synchronous filter function `fn(Value, &[Value]) -> Result<Value, EngineError>`
/// under the pipe-syntax name given in `name = "..."`. The generated `register_<fn>` function
/// adapts the synchronous body into the registry's deferred-returning handler shape, exactly as
/// the legacy "callback" filters in the specification are adapted by wrapping into a deferred.
#[proc_macro_attribute]
pub fn filter(attr: TokenStream, item: TokenStream) -> TokenStream {
    registration_impl(attr, item, "FilterRegistry", "register_filter")
}

/// Registers a synchronous test predicate `fn(Value, &[Value]) -> Result<bool, EngineError>`
/// under the `is name` syntax name given in `name = "..."`.
#[proc_macro_attribute]
pub fn test_fn(attr: TokenStream, item: TokenStream) -> TokenStream {
    registration_impl(attr, item, "TestRegistry", "register_test")
}

fn registration_impl(
    attr: TokenStream,
    item: TokenStream,
    registry_ty: &str,
    register_method: &str,
) -> TokenStream {
    let NameArg { name } = parse_macro_input!(attr as NameArg);
    let func = parse_macro_input!(item as ItemFn);

    let fn_name = func.sig.ident.clone();
    let register_fn_name = format_ident!("register_{}", fn_name);
    let registry_ty = format_ident!("{}", registry_ty);
    let register_method = format_ident!("{}", register_method);

    let expanded = quote! {
        #func

        /// Binds `#fn_name` into a registry under its declared name.
        #[allow(dead_code)]
        pub fn #register_fn_name(registry: &mut crate::registry::#registry_ty) {
            registry.#register_method(#name, #fn_name);
        }
    };

    TokenStream::from(expanded)
}
