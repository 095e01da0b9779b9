use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{
    parse_macro_input, FnArg, GenericArgument, Generics, Ident, ItemFn, Pat, PatType,
    PathArguments, ReturnType, Type, TypeParamBound, WherePredicate,
};

fn is_fn_bound(bound: &TypeParamBound) -> bool {
    match bound {
        TypeParamBound::Trait(trait_bound) => {
            trait_bound.path.segments.last().is_some_and(|segment| {
                segment.ident == "Fn" || segment.ident == "FnMut" || segment.ident == "FnOnce"
            })
        }
        _ => false,
    }
}

/// `impl Fn..`, `dyn Fn..`, bare `fn(..)` and smart pointers around a trait
/// object (`Box<dyn Fn()>`, `Rc<dyn Fn()>`).
fn is_fn_like_type(ty: &Type) -> bool {
    match ty {
        Type::ImplTrait(impl_trait) => impl_trait.bounds.iter().any(is_fn_bound),
        Type::TraitObject(object) => object.bounds.iter().any(is_fn_bound),
        Type::BareFn(_) => true,
        Type::Path(type_path) => {
            let Some(segment) = type_path.path.segments.last() else {
                return false;
            };
            let PathArguments::AngleBracketed(args) = &segment.arguments else {
                return false;
            };
            matches!(
                args.args.first(),
                Some(GenericArgument::Type(Type::TraitObject(object)))
                    if object.bounds.iter().any(is_fn_bound)
            )
        }
        _ => false,
    }
}

/// A generic parameter bounded by one of the `Fn` traits, inline or in the
/// where clause.
fn is_generic_fn_like(ty: &Type, generics: &Generics) -> bool {
    let ident = match ty {
        Type::Path(type_path) if type_path.qself.is_none() => {
            match type_path.path.get_ident() {
                Some(ident) => ident,
                None => return false,
            }
        }
        _ => return false,
    };

    let inline = generics.type_params().any(|param| {
        param.ident == *ident && param.bounds.iter().any(is_fn_bound)
    });
    if inline {
        return true;
    }

    generics.where_clause.as_ref().is_some_and(|where_clause| {
        where_clause.predicates.iter().any(|predicate| match predicate {
            WherePredicate::Type(pred) => {
                matches!(&pred.bounded_ty, Type::Path(bounded) if bounded.path.is_ident(ident))
                    && pred.bounds.iter().any(is_fn_bound)
            }
            _ => false,
        })
    })
}

/// How a parameter takes part in the skip decision.
enum Tracking {
    /// Stored in a `ParamState` and compared with `PartialEq`.
    Compared,
    /// Closures, `impl Trait` and borrowed values cannot be stored or
    /// compared; passing one always re-runs the body.
    AlwaysChanged,
}

struct Param {
    ident: Ident,
    pat: Box<Pat>,
    ty: Type,
    tracking: Tracking,
}

fn tracking_for(ty: &Type, generics: &Generics) -> Tracking {
    let untrackable = matches!(ty, Type::ImplTrait(_) | Type::Reference(_))
        || is_fn_like_type(ty)
        || is_generic_fn_like(ty, generics);
    if untrackable {
        Tracking::AlwaysChanged
    } else {
        Tracking::Compared
    }
}

/// Turns a function into a composable.
///
/// The body runs inside a group keyed by the function's source location.
/// When the enclosing content re-runs and every comparable parameter equals
/// the previous pass, the body is skipped, its slots and nodes are kept, and
/// the previous return value is returned. A group whose own state reads were invalidated always
/// re-runs.
///
/// `#[composable(no_skip)]` keeps the group but always runs the body.
#[proc_macro_attribute]
pub fn composable(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr_tokens = TokenStream2::from(attr);
    let mut enable_skip = true;
    if !attr_tokens.is_empty() {
        match syn::parse2::<Ident>(attr_tokens) {
            Ok(ident) if ident == "no_skip" => enable_skip = false,
            Ok(other) => {
                return syn::Error::new_spanned(other, "unsupported composable attribute")
                    .to_compile_error()
                    .into();
            }
            Err(err) => return err.to_compile_error().into(),
        }
    }

    let mut func = parse_macro_input!(item as ItemFn);
    let generics = func.sig.generics.clone();

    let mut params: Vec<Param> = Vec::new();
    for (index, arg) in func.sig.inputs.iter_mut().enumerate() {
        match arg {
            FnArg::Receiver(receiver) => {
                return syn::Error::new_spanned(
                    receiver,
                    "composable functions cannot take `self`",
                )
                .to_compile_error()
                .into();
            }
            FnArg::Typed(PatType { pat, ty, .. }) => {
                let ident = Ident::new(&format!("__arg{index}"), Span::call_site());
                let original = pat.clone();
                *pat = Box::new(syn::parse_quote! { #ident });
                params.push(Param {
                    ident,
                    pat: original,
                    ty: ty.as_ref().clone(),
                    tracking: tracking_for(ty, &generics),
                });
            }
        }
    }

    let body = func.block.clone();
    let key_expr = quote! { ::trellis_core::location_key(file!(), line!(), column!()) };
    let rebinds: Vec<TokenStream2> = params
        .iter()
        .map(|param| {
            let ident = &param.ident;
            let pat = &param.pat;
            quote! { let #pat = #ident; }
        })
        .collect();

    if !enable_skip {
        let wrapped = quote!({
            ::trellis_core::with_current_composer(|__composer: &::trellis_core::Composer| {
                __composer.with_group(#key_expr, |_: &::trellis_core::Composer| {
                    #(#rebinds)*
                    #body
                })
            })
        });
        func.block = Box::new(syn::parse_quote!(#wrapped));
        return TokenStream::from(quote! { #func });
    }

    let return_ty: Type = match &func.sig.output {
        ReturnType::Default => syn::parse_quote! { () },
        ReturnType::Type(_, ty) => ty.as_ref().clone(),
    };
    let helper_ident = Ident::new(
        &format!("__trellis_impl_{}", func.sig.ident),
        Span::call_site(),
    );
    let (impl_generics, _, where_clause) = generics.split_for_impl();

    let helper_inputs: Vec<TokenStream2> = params
        .iter()
        .map(|param| {
            let ident = &param.ident;
            let ty = &param.ty;
            quote! { #ident: #ty }
        })
        .collect();
    let call_args: Vec<&Ident> = params.iter().map(|param| &param.ident).collect();

    let param_checks: Vec<TokenStream2> = params
        .iter()
        .map(|param| match param.tracking {
            Tracking::AlwaysChanged => quote! { __changed = true; },
            Tracking::Compared => {
                let ident = &param.ident;
                let ty = &param.ty;
                quote! {
                    let __slot = __composer
                        .next_slot(::trellis_core::ParamState::<#ty>::default);
                    let __differs = __composer
                        .with_slot_value(__slot, |state: &mut ::trellis_core::ParamState<#ty>| {
                            state.update(&#ident)
                        })
                        .unwrap_or(true);
                    __changed |= __differs;
                }
            }
        })
        .collect();

    let helper_fn = quote! {
        #[doc(hidden)]
        #[allow(non_snake_case, unused_mut, unused_assignments, clippy::too_many_arguments)]
        fn #helper_ident #impl_generics (
            __composer: &::trellis_core::Composer
            #(, #helper_inputs)*
        ) -> #return_ty #where_clause {
            let mut __changed = __composer
                .current_recompose_scope()
                .map_or(true, |scope| scope.is_invalid());
            #(#param_checks)*
            let __result_slot = __composer
                .next_slot(::trellis_core::ReturnSlot::<#return_ty>::default);
            if !__changed {
                let __previous = __composer
                    .with_slot_value(__result_slot, |slot: &mut ::trellis_core::ReturnSlot<#return_ty>| {
                        slot.get()
                    })
                    .flatten();
                if let Some(__previous) = __previous {
                    __composer.skip_current_group();
                    return __previous;
                }
            }
            let __value: #return_ty = {
                #(#rebinds)*
                #body
            };
            __composer.with_slot_value(__result_slot, |slot: &mut ::trellis_core::ReturnSlot<#return_ty>| {
                slot.store(::core::clone::Clone::clone(&__value));
            });
            __value
        }
    };

    let wrapped = quote!({
        ::trellis_core::with_current_composer(|__composer: &::trellis_core::Composer| {
            __composer.with_group(#key_expr, |__composer: &::trellis_core::Composer| {
                #helper_ident(__composer #(, #call_args)*)
            })
        })
    });
    func.block = Box::new(syn::parse_quote!(#wrapped));

    TokenStream::from(quote! {
        #helper_fn
        #func
    })
}
