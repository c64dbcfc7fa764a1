use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, LitStr};

pub fn derive_message(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let type_name = match extract_name(input)? {
        Some(explicit) => quote! { #explicit },
        None => {
            let ident = name.to_string();
            quote! { concat!(module_path!(), "::", #ident) }
        }
    };

    Ok(quote! {
        impl #impl_generics ::conveyor::Message for #name #ty_generics #where_clause {
            fn type_name() -> &'static str {
                #type_name
            }
        }
    })
}

/// Read `#[message(name = "...")]` from the type's attributes.
fn extract_name(input: &DeriveInput) -> syn::Result<Option<LitStr>> {
    let mut name = None;
    for attr in &input.attrs {
        if !attr.path().is_ident("message") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().trim().is_empty() {
                    return Err(meta.error("message name must not be empty"));
                }
                name = Some(value);
                Ok(())
            } else {
                Err(meta.error("unsupported message attribute, expected `name = \"...\"`"))
            }
        })?;
    }
    Ok(name)
}
