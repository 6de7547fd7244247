//! Declarative macros for ergonomic effect construction.
//!
//! Reducers build the same three effects over and over: persist the event
//! that just happened, publish it for read models, and sometimes schedule
//! an expiry action. These macros keep those call sites flat instead of
//! nesting operation structs and boxed callbacks by hand.

/// Create an `Effect::EventStore` with an `AppendEvents` operation.
///
/// # Example
///
/// ```rust,ignore
/// use stagepass_core::append_events;
///
/// append_events! {
///     store: env.event_store,
///     stream: stream_id.as_str(),
///     expected_version: None,
///     events: vec![serialized],
///     on_success: |version| Some(LedgerAction::EventsAppended { version: version.value() }),
///     on_error: |error| Some(LedgerAction::AppendFailed { reason: error.to_string() })
/// }
/// ```
#[macro_export]
macro_rules! append_events {
    (
        store: $store:expr,
        stream: $stream:expr,
        expected_version: $expected:expr,
        events: $events:expr,
        on_success: |$success_param:ident| $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::EventStore($crate::effect::EventStoreOperation::AppendEvents {
            event_store: ::std::sync::Arc::clone(&$store),
            stream_id: $crate::stream::StreamId::new($stream),
            expected_version: $expected,
            events: $events,
            on_success: ::std::boxed::Box::new(move |$success_param| $success_body),
            on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
        })
    };
}

/// Create an `Effect::EventStore` with a `LoadEvents` operation.
///
/// # Example
///
/// ```rust,ignore
/// use stagepass_core::load_events;
///
/// load_events! {
///     store: env.event_store,
///     stream: "ledger-summer-fest",
///     from_version: None,
///     on_success: |events| Some(LedgerAction::EventsLoaded { count: events.len() }),
///     on_error: |error| Some(LedgerAction::LoadFailed { reason: error.to_string() })
/// }
/// ```
#[macro_export]
macro_rules! load_events {
    (
        store: $store:expr,
        stream: $stream:expr,
        from_version: $from:expr,
        on_success: |$success_param:ident| $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::EventStore($crate::effect::EventStoreOperation::LoadEvents {
            event_store: ::std::sync::Arc::clone(&$store),
            stream_id: $crate::stream::StreamId::new($stream),
            from_version: $from,
            on_success: ::std::boxed::Box::new(move |$success_param| $success_body),
            on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
        })
    };
}

/// Create an `Effect::PublishEvent` operation.
///
/// # Example
///
/// ```rust,ignore
/// use stagepass_core::publish_event;
///
/// publish_event! {
///     bus: env.event_bus,
///     topic: "ledger-events",
///     event: serialized,
///     on_success: || None,
///     on_error: |error| Some(LedgerAction::PublishFailed { reason: error.to_string() })
/// }
/// ```
#[macro_export]
macro_rules! publish_event {
    (
        bus: $bus:expr,
        topic: $topic:expr,
        event: $event:expr,
        on_success: || $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::PublishEvent($crate::effect::EventBusOperation::Publish {
            event_bus: ::std::sync::Arc::clone(&$bus),
            topic: $topic.to_string(),
            event: $event,
            on_success: ::std::boxed::Box::new(move |()| $success_body),
            on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
        })
    };
}

/// Create an `Effect::Future` from an async block.
///
/// # Example
///
/// ```rust,ignore
/// use stagepass_core::async_effect;
///
/// async_effect! {
///     let report = build_settlement_report().await;
///     Some(LedgerAction::ReportReady { report })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(::std::boxed::Box::pin(async move { $($body)* }))
    };
}

/// Create an `Effect::Delay` for scheduling a future action.
///
/// Used for transfer-request and cash-hold expiry: the reducer schedules
/// the expiry action at creation time and re-checks the deadline when the
/// action arrives.
///
/// # Example
///
/// ```rust,ignore
/// use stagepass_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(30 * 60),
///     action: LedgerAction::ExpireHold { hold_id }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}
