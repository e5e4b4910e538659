use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemStruct, Path, parse_macro_input};

extern crate proc_macro;

/// Derives the data traits every sample, aggregate and report shares.
fn data_derives(ast: &ItemStruct) -> proc_macro2::TokenStream {
    quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialOrd,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast
    }
}

/// Marks a struct as a `Metric`.
///
/// `Metric` must be in scope where the attribute is used.
#[proc_macro_attribute]
pub fn metric(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemStruct);
    let ident = &ast.ident;
    let data = data_derives(&ast);
    let expanded = quote! {
        #data

        impl Metric for #ident {}
    };

    TokenStream::from(expanded)
}

/// Adds the derives required by `Aggregate`. The trait itself is implemented by hand.
#[proc_macro_attribute]
pub fn aggregate(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemStruct);
    TokenStream::from(data_derives(&ast))
}

/// Marks a struct as the `Report` of the aggregate named in the attribute,
/// e.g. `#[report(LevelAggregate)]`.
///
/// The `From<Execution<_>>` conversion is left to the caller.
#[proc_macro_attribute]
pub fn report(attr: TokenStream, item: TokenStream) -> TokenStream {
    let aggregate = parse_macro_input!(attr as Path);
    let ast = parse_macro_input!(item as ItemStruct);
    let ident = &ast.ident;
    let data = data_derives(&ast);
    let expanded = quote! {
        #data

        impl Report<#aggregate> for #ident {}
    };

    TokenStream::from(expanded)
}
