use proc_macro::TokenStream;
use quote::quote;
use syn::{Expr, ItemFn, LitStr, parse_macro_input};

#[derive(Default)]
struct MainArgs {
    workers: Option<Expr>,
    name: Option<LitStr>,
}

pub(crate) fn main_impl(args: TokenStream, item: TokenStream) -> TokenStream {
    let mut main_args = MainArgs::default();
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("workers") {
            main_args.workers = Some(meta.value()?.parse()?);
            Ok(())
        } else if meta.path.is_ident("name") {
            main_args.name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("expected `workers = ...` or `name = \"...\"`"))
        }
    });
    parse_macro_input!(args with parser);

    let input = parse_macro_input!(item as ItemFn);
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if let Some(asyncness) = sig.asyncness {
        return syn::Error::new_spanned(asyncness, "fiber::main cannot be applied to an async fn")
            .to_compile_error()
            .into();
    }

    let workers = match main_args.workers {
        Some(workers) => quote!(#workers),
        None => quote!(::std::thread::available_parallelism().map_or(1, ::std::num::NonZeroUsize::get)),
    };
    let name = match main_args.name {
        Some(name) => quote!(#name),
        None => quote!("main"),
    };

    quote! {
        #(#attrs)*
        #vis #sig {
            ::fiber::scheduler::block_on(#workers, #name, move || #block)
                .expect("the main scheduler failed to run")
        }
    }
    .into()
}
