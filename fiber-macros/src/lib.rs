//! Macros for use with fiber.

extern crate proc_macro;

use proc_macro::TokenStream;

mod entry;

/// Runs the function body as the first task of a scheduler the calling thread
/// participates in. The scheduler stops once the body returns, after the
/// tasks queued by then have run.
///
/// ```ignore
/// #[fiber::main(workers = 4, name = "app")]
/// fn main() {
///     fiber::Handle::current().unwrap().spawn(|| println!("hello"));
/// }
/// ```
///
/// `workers` defaults to the available parallelism, `name` to `"main"`.
#[proc_macro_attribute]
pub fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    entry::main_impl(args, item)
}
