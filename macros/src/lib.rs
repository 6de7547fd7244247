//! Derive macros for Stagepass aggregates
//!
//! This crate provides procedural macros to reduce boilerplate when building
//! event-sourced aggregates with Stagepass.
//!
//! # Available Macros
//!
//! - `#[derive(Action)]` - Generates helpers for action enums (commands/events)
//! - `#[derive(State)]` - Generates common state traits and helpers
//!
//! # Example
//!
//! ```ignore
//! use stagepass_macros::Action;
//!
//! #[derive(Action, Clone, Debug)]
//! enum ScanAction {
//!     #[command]
//!     ScanTicket { ticket_code: String },
//!
//!     #[event]
//!     TicketScanned { ticket_code: String, scanned_at: DateTime<Utc> },
//! }
//!
//! // Generated methods:
//! assert!(ScanAction::ScanTicket { ticket_code: "TKT-1A2B".into() }.is_command());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Variant};

/// The role a variant plays in an action enum.
enum VariantKind {
    Command,
    Event,
}

/// Derive macro for Action enums
///
/// Generates helper methods for action enums:
/// - `is_command()` - Returns true if this variant is a command
/// - `is_event()` - Returns true if this variant is an event
/// - `event_type()` - Returns the event type name for serialization
///
/// # Attributes
///
/// - `#[command]` - Mark a variant as a command
/// - `#[event]` - Mark a variant as an event
///
/// Unmarked variants are internal actions (effect callbacks, timer ticks);
/// they are neither commands nor events and carry no event type.
///
/// # Errors
///
/// This macro produces a compile error (not a runtime panic) if:
/// - Applied to a non-enum type
/// - A variant has both `#[command]` and `#[event]` attributes
///
/// # Example
///
/// ```ignore
/// #[derive(Action, Clone, Debug)]
/// enum LedgerAction {
///     #[command]
///     AllocateTickets { staff_id: String, tier_id: String, quantity: u32 },
///
///     #[event]
///     TicketsAllocated { allocation_id: String, staff_id: String, quantity: u32 },
///
///     #[command]
///     RecordSale { sale_id: String, quantity: u32 },
///
///     #[event]
///     SaleRecorded { sale_id: String, ticket_codes: Vec<String> },
/// }
///
/// // Usage:
/// let action = LedgerAction::AllocateTickets {
///     staff_id: "staff-ana".into(),
///     tier_id: "tier-ga".into(),
///     quantity: 20,
/// };
///
/// assert!(action.is_command());
/// assert!(!action.is_event());
/// ```
#[proc_macro_derive(Action, attributes(command, event))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(input, "#[derive(Action)] can only be used on enums")
            .to_compile_error()
            .into();
    };

    let mut is_command_arms = Vec::new();
    let mut is_event_arms = Vec::new();
    let mut event_type_arms = Vec::new();

    for variant in &data_enum.variants {
        let pattern = variant_pattern(variant);
        match classify(variant) {
            Err(error) => return error.to_compile_error().into(),
            Ok(Some(VariantKind::Command)) => {
                is_command_arms.push(quote! { #pattern => true, });
            }
            Ok(Some(VariantKind::Event)) => {
                let type_name = format!("{}.v1", variant.ident);
                is_event_arms.push(quote! { #pattern => true, });
                event_type_arms.push(quote! { #pattern => #type_name, });
            }
            Ok(None) => {}
        }
    }

    let expanded = quote! {
        impl #name {
            /// Returns true if this action is a command
            #[must_use]
            pub const fn is_command(&self) -> bool {
                match self {
                    #(#is_command_arms)*
                    _ => false,
                }
            }

            /// Returns true if this action is an event
            #[must_use]
            pub const fn is_event(&self) -> bool {
                match self {
                    #(#is_event_arms)*
                    _ => false,
                }
            }

            /// Returns the event type name for serialization
            ///
            /// Only events have type names. Commands return "unknown".
            #[must_use]
            pub const fn event_type(&self) -> &'static str {
                match self {
                    #(#event_type_arms)*
                    _ => "unknown",
                }
            }
        }
    };

    TokenStream::from(expanded)
}

/// Derive macro for State structs
///
/// Generates version-tracking accessors for the field marked `#[version]`:
/// - `version()` - Returns the current stream version, if loaded
/// - `set_version()` - Records the version after a successful append
///
/// Structs without a `#[version]` field get no generated code.
///
/// # Attributes
///
/// - `#[version]` - Mark a field as the version tracker
///
/// # Errors
///
/// This macro produces a compile error (not a runtime panic) if:
/// - Applied to a non-struct type
/// - `#[version]` is placed on a tuple-struct field
///
/// # Example
///
/// ```ignore
/// use stagepass_macros::State;
/// use stagepass_core::stream::Version;
///
/// #[derive(State, Clone, Debug)]
/// struct LedgerState {
///     pub tiers: BTreeMap<TierId, Tier>,
///     #[version]
///     pub version: Option<Version>,
/// }
/// ```
#[proc_macro_derive(State, attributes(version))]
pub fn derive_state(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let Data::Struct(data_struct) = &input.data else {
        return syn::Error::new_spanned(input, "#[derive(State)] can only be used on structs")
            .to_compile_error()
            .into();
    };

    let version_field = data_struct
        .fields
        .iter()
        .find(|field| has_attribute(&field.attrs, "version"));

    let Some(field) = version_field else {
        return TokenStream::new();
    };

    let Some(field_name) = field.ident.as_ref() else {
        return syn::Error::new_spanned(field, "#[version] requires a named field")
            .to_compile_error()
            .into();
    };

    let expanded = quote! {
        impl #name {
            /// Get the current version of this state
            #[must_use]
            pub const fn version(&self) -> Option<stagepass_core::stream::Version> {
                self.#field_name
            }

            /// Set the version of this state
            pub fn set_version(&mut self, version: stagepass_core::stream::Version) {
                self.#field_name = Some(version);
            }
        }
    };

    TokenStream::from(expanded)
}

/// Classify a variant by its `#[command]`/`#[event]` attributes.
fn classify(variant: &Variant) -> Result<Option<VariantKind>, syn::Error> {
    let is_command = has_attribute(&variant.attrs, "command");
    let is_event = has_attribute(&variant.attrs, "event");

    match (is_command, is_event) {
        (true, true) => Err(syn::Error::new_spanned(
            variant,
            "Variant cannot be both #[command] and #[event]",
        )),
        (true, false) => Ok(Some(VariantKind::Command)),
        (false, true) => Ok(Some(VariantKind::Event)),
        (false, false) => Ok(None),
    }
}

/// Build the match pattern for a variant, regardless of its field shape.
fn variant_pattern(variant: &Variant) -> proc_macro2::TokenStream {
    let name = &variant.ident;
    match &variant.fields {
        Fields::Named(_) => quote! { Self::#name { .. } },
        Fields::Unnamed(_) => quote! { Self::#name(..) },
        Fields::Unit => quote! { Self::#name },
    }
}

/// Helper function to check if an attribute list contains a specific attribute
fn has_attribute(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(name))
}
