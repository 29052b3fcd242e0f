//! `#[derive(ApiRequest)]` for autograder request types.
//!
//! ```rust,ignore
//! #[derive(serde::Deserialize, ApiRequest)]
//! #[api(min_role = Grader)]
//! struct FetchRequest {
//!     #[api(context)]
//!     #[serde(flatten)]
//!     ctx: AssignmentContext,
//!     #[api(special)]
//!     #[serde(rename = "target-email")]
//!     target: TargetUser,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, LitStr, Result as SynResult,
    Token,
};

#[proc_macro_derive(ApiRequest, attributes(api))]
pub fn derive_api_request(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

struct SpecialDef {
    ident: Ident,
    json_name: String,
}

fn expand(input: &DeriveInput) -> SynResult<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let roles = struct_roles(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "ApiRequest requires a struct with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "ApiRequest can only be derived for structs",
            ))
        }
    };

    let mut context: Option<Ident> = None;
    let mut specials = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let mut is_context = false;
        let mut special: Option<Option<String>> = None;

        for attr in field.attrs.iter().filter(|a| a.path().is_ident("api")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("context") {
                    is_context = true;
                    Ok(())
                } else if meta.path.is_ident("special") {
                    let explicit = if meta.input.peek(Token![=]) {
                        let lit: LitStr = meta.value()?.parse()?;
                        Some(lit.value())
                    } else {
                        None
                    };
                    special = Some(explicit);
                    Ok(())
                } else {
                    Err(meta.error("expected `context` or `special`"))
                }
            })?;
        }

        if is_context {
            if context.is_some() {
                return Err(syn::Error::new_spanned(
                    &ident,
                    "only one field may be marked #[api(context)]",
                ));
            }
            context = Some(ident.clone());
        }

        if let Some(explicit) = special {
            let json_name = match explicit {
                Some(name) => name,
                None => serde_rename(&field.attrs)?.unwrap_or_else(|| ident.to_string()),
            };
            specials.push(SpecialDef { ident, json_name });
        }
    }

    let (context_mut, context_ref) = match &context {
        Some(field) => (
            quote! { ::core::option::Option::Some(::autograder::api::AsContext::as_context_mut(&mut self.#field)) },
            quote! { ::core::option::Option::Some(::autograder::api::AsContext::as_context(&self.#field)) },
        ),
        None => (
            quote! { ::core::option::Option::None },
            quote! { ::core::option::Option::None },
        ),
    };

    let special_entries = specials.iter().map(|s| {
        let ident = &s.ident;
        let json_name = &s.json_name;
        quote! {
            (#json_name, ::autograder::api::SpecialField::slot(&mut self.#ident))
        }
    });

    Ok(quote! {
        impl #impl_generics ::autograder::api::ApiRequest for #name #ty_generics #where_clause {
            const MIN_ROLES: &'static [::autograder::model::Role] = &[
                #(::autograder::model::Role::#roles),*
            ];

            fn context_mut(&mut self) -> ::core::option::Option<::autograder::api::ContextMut<'_>> {
                #context_mut
            }

            fn context(&self) -> ::core::option::Option<::autograder::api::ContextRef<'_>> {
                #context_ref
            }

            fn special_fields(
                &mut self,
            ) -> ::std::vec::Vec<(&'static str, ::autograder::api::FieldSlot<'_>)> {
                ::std::vec![#(#special_entries),*]
            }
        }
    })
}

/// Collect every `#[api(min_role = X)]` on the struct.
fn struct_roles(attrs: &[Attribute]) -> SynResult<Vec<Ident>> {
    let mut roles = Vec::new();
    for attr in attrs.iter().filter(|a| a.path().is_ident("api")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("min_role") {
                roles.push(meta.value()?.parse::<Ident>()?);
                Ok(())
            } else {
                Err(meta.error("expected `min_role = <Role>`"))
            }
        })?;
    }
    Ok(roles)
}

/// The `rename = "..."` value of a field's serde attributes, if any.
fn serde_rename(attrs: &[Attribute]) -> SynResult<Option<String>> {
    let mut rename = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") && meta.input.peek(Token![=]) {
                let lit: LitStr = meta.value()?.parse()?;
                rename = Some(lit.value());
            } else if meta.input.peek(Token![=]) {
                meta.value()?.parse::<syn::Expr>()?;
            } else if meta.input.peek(syn::token::Paren) {
                meta.input.parse::<proc_macro2::TokenTree>()?;
            }
            Ok(())
        })?;
    }
    Ok(rename)
}
