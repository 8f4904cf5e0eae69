//! # Accessor Derive
//!
//! Derive macro for read-only configuration structs: const getters plus
//! consuming `with_*` builders.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitBool, parse_macro_input, spanned::Spanned};

/// Derive to generate `const .<field>(&self) -> Ty` and
/// `const .with_<field>(mut self, value: Ty) -> Self` for each **named** field.
///
/// Field types must be `Copy` for the generated functions to be `const`.
///
/// - Skipping a field entirely: `#[accessors(skip)]`
/// - Getter only, no builder: `#[accessors(get_only)]`
///
/// # Example
///
/// ```
/// use utils_accessors_derive::Accessors;
///
/// #[derive(Clone, Copy, Default, Accessors)]
/// struct Geometry {
///     page_size: u64,
///     #[accessors(get_only)]
///     levels: u8,
///     #[accessors(skip)]
///     _reserved: u8,
/// }
///
/// const G: Geometry = Geometry { page_size: 0, levels: 5, _reserved: 0 }.with_page_size(4096);
/// assert_eq!(G.page_size(), 4096);
/// assert_eq!(G.levels(), 5);
/// ```
#[proc_macro_derive(Accessors, attributes(accessors))]
pub fn derive_accessors(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let fields = match data {
        Data::Struct(s) => match s.fields {
            Fields::Named(n) => n.named,
            Fields::Unnamed(u) => {
                return syn::Error::new(u.span(), "Accessors only supports named fields")
                    .to_compile_error()
                    .into();
            }
            Fields::Unit => {
                return syn::Error::new(ident.span(), "Accessors does not apply to unit structs")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new(ident.span(), "Accessors can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut methods = Vec::new();

    for field in fields {
        let Some(fname) = &field.ident else { continue };
        let mode = parse_mode(&field.attrs);
        if mode == Mode::Skip {
            continue;
        }

        let ty = &field.ty;
        methods.push(quote! {
            #[inline]
            #[must_use]
            pub const fn #fname(&self) -> #ty {
                self.#fname
            }
        });

        if mode == Mode::GetOnly {
            continue;
        }

        let with_name = format_ident!("with_{}", fname);
        methods.push(quote! {
            #[inline]
            #[must_use]
            pub const fn #with_name(mut self, value: #ty) -> Self {
                self.#fname = value;
                self
            }
        });
    }

    let expanded = quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    };

    TokenStream::from(expanded)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Both,
    GetOnly,
    Skip,
}

fn parse_mode(attrs: &[syn::Attribute]) -> Mode {
    let mut mode = Mode::Both;
    for attr in attrs {
        if !attr.path().is_ident("accessors") {
            continue;
        }

        // #[accessors(skip)], #[accessors(skip = true)], #[accessors(get_only)]
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                if meta.input.is_empty() {
                    mode = Mode::Skip;
                } else if let Ok(v) = meta.value()?.parse::<LitBool>()
                    && v.value
                {
                    mode = Mode::Skip;
                }
            } else if meta.path.is_ident("get_only") && mode != Mode::Skip {
                mode = Mode::GetOnly;
            }
            Ok(())
        });
    }
    mode
}
