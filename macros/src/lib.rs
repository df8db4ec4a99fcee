//! Procedural macros for on-device tests in lora-sensor-node.
//!
//! `#[tap_test]` registers a function with the TAP runner in
//! `lora_sensor_node::testing`, so the same test body runs on the host and
//! on the node itself via the `device-tests` binary.

use proc_macro::TokenStream;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType, Token};

/// Mark a function as a TAP test.
///
/// Supported forms:
///
/// - `#[tap_test]`
/// - `#[tap_test(should_panic)]`
/// - `#[tap_test(should_panic = "expected message")]`
///
/// A test either returns `()` (a panic fails it) or a `Result` whose `Err`
/// fails it.
///
/// ```ignore
/// use lora_sensor_node_macros::tap_test;
///
/// #[tap_test]
/// fn payload_is_eight_bytes() {
///     assert_eq!(UplinkPayload::LEN, 8);
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let expectation = match parse_expectation(attr) {
        Ok(e) => e,
        Err(err) => return err.to_compile_error().into(),
    };

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let returns_result = matches!(input_fn.sig.output, ReturnType::Type(_, _));

    let register_call = match expectation {
        Expectation::Pass if returns_result => quote! {
            runner.run(#fn_name_str, #fn_name);
        },
        Expectation::Pass => quote! {
            runner.run_assert(#fn_name_str, #fn_name);
        },
        Expectation::Panic(None) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, None);
        },
        Expectation::Panic(Some(msg)) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg));
        },
    };

    let expanded = quote! {
        #input_fn

        ::inventory::submit! {
            ::lora_sensor_node::testing::TapTestEntry::new(
                #fn_name_str,
                |runner: &mut ::lora_sensor_node::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum Expectation {
    Pass,
    Panic(Option<String>),
}

fn parse_expectation(attr: TokenStream) -> syn::Result<Expectation> {
    if attr.is_empty() {
        return Ok(Expectation::Pass);
    }

    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse(attr)?;
    let mut expectation = Expectation::Pass;

    for meta in metas {
        match meta {
            Meta::Path(path) if path.is_ident("should_panic") => {
                expectation = Expectation::Panic(None);
            }
            Meta::NameValue(nv) if nv.path.is_ident("should_panic") => match nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(s), ..
                }) => expectation = Expectation::Panic(Some(s.value())),
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "tap_test: should_panic expects a string literal",
                    ))
                }
            },
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "tap_test: supported attributes are `should_panic` and `should_panic = \"msg\"`",
                ))
            }
        }
    }

    Ok(expectation)
}
