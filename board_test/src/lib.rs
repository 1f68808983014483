use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that the board is shut down regardless of how the test terminates.
///
/// Injectable dependencies are [`crate::Board`], [`crate::notify::Outbox`] and
/// [`crate::model::db::Database`]. Pass `local` to back the board with a
/// temporary storage directory instead of memory.
#[proc_macro_attribute]
pub fn board_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract the arguments to inject and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let storage = match parse_macro_input!(args as Option<Ident>) {
        None => quote! {
            (crate::Config::in_memory(), None)
        },
        Some(arg) if arg == "local" => quote! {
            {
                let dir = tempfile::tempdir().unwrap();
                (crate::Config::in_memory().with_local_storage(dir.path()), Some(dir))
            }
        },
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `local`")
                .into_compile_error()
                .into();
        }
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup() -> (crate::Board, crate::notify::Outbox, Option<tempfile::TempDir>) {
                let (config, dir): (crate::Config, Option<tempfile::TempDir>) = #storage;
                let (board, outbox) = crate::testing::launch(config).await;
                (board, outbox, dir)
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(board: crate::Board, dir: Option<tempfile::TempDir>) {
                board.shutdown().await;
                drop(dir);
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = tokio::runtime::Builder::new_multi_thread()
                .thread_name("board-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (board, outbox, dir) = outer_runtime.block_on(setup());

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let board_mutex = std::sync::Mutex::new(board.clone());
            let outbox_mutex = std::sync::Mutex::new(outbox);
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                #[allow(unused_variables)]
                let board = board_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let outbox = outbox_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            outer_runtime.block_on(cleanup(board, dir));

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, and map each parameter to the value to inject.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen: Vec<String> = vec![];
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    if let Some(type_ident) = type_path.path.get_ident() {
                        let injected = if type_ident == "Board" {
                            quote! { board.clone() }
                        } else if type_ident == "Outbox" {
                            quote! { outbox.clone() }
                        } else if type_ident == "Database" {
                            quote! { board.database().clone() }
                        } else {
                            return Err(syn::Error::new(
                                input.span(),
                                "Expected one of `board: Board`, `outbox: Outbox` or `db: Database`",
                            ));
                        };
                        let type_name = type_ident.to_string();
                        if seen.contains(&type_name) {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_name}`"),
                            ));
                        }
                        seen.push(type_name);
                        args.push(injected);
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `board: Board`, `outbox: Outbox` or `db: Database`",
        ));
    }

    Ok(args)
}
