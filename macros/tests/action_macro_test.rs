//! Tests for #[derive(Action)] macro

use chrono::{DateTime, Utc};
use stagepass_macros::Action;

#[derive(Action, Clone, Debug, PartialEq)]
enum ScanAction {
    #[command]
    ScanTicket {
        ticket_code: String,
    },

    #[command]
    RebuildRegister,

    #[command]
    VoidTicket {
        ticket_code: String,
        reason: String,
    },

    #[event]
    TicketScanned {
        ticket_code: String,
        scanned_at: DateTime<Utc>,
    },

    #[event]
    TicketVoided {
        ticket_code: String,
        reason: String,
        voided_at: DateTime<Utc>,
    },

    #[event]
    ScanRejected {
        ticket_code: String,
        original_scan_at: DateTime<Utc>,
    },
}

#[test]
fn test_is_command() {
    let action = ScanAction::ScanTicket {
        ticket_code: "TKT-1A2B".to_string(),
    };
    assert!(action.is_command());
    assert!(!action.is_event());
}

#[test]
fn test_is_event() {
    let action = ScanAction::TicketScanned {
        ticket_code: "TKT-1A2B".to_string(),
        scanned_at: Utc::now(),
    };
    assert!(!action.is_command());
    assert!(action.is_event());
}

#[test]
fn test_event_type() {
    let action = ScanAction::TicketScanned {
        ticket_code: "TKT-1A2B".to_string(),
        scanned_at: Utc::now(),
    };
    assert_eq!(action.event_type(), "TicketScanned.v1");
}

#[test]
fn test_command_event_type() {
    let action = ScanAction::ScanTicket {
        ticket_code: "TKT-1A2B".to_string(),
    };
    // Commands don't have event types
    assert_eq!(action.event_type(), "unknown");
}

#[test]
fn test_unit_command() {
    let action = ScanAction::RebuildRegister;
    assert!(action.is_command());
    assert!(!action.is_event());
}

#[test]
fn test_all_commands_identified() {
    let commands = vec![
        ScanAction::ScanTicket {
            ticket_code: "TKT-1A2B".to_string(),
        },
        ScanAction::RebuildRegister,
        ScanAction::VoidTicket {
            ticket_code: "TKT-1A2B".to_string(),
            reason: "refunded".to_string(),
        },
    ];

    for cmd in commands {
        assert!(cmd.is_command(), "Expected command: {cmd:?}");
        assert!(!cmd.is_event(), "Should not be event: {cmd:?}");
    }
}

#[test]
fn test_all_events_identified() {
    let events = vec![
        ScanAction::TicketScanned {
            ticket_code: "TKT-1A2B".to_string(),
            scanned_at: Utc::now(),
        },
        ScanAction::TicketVoided {
            ticket_code: "TKT-1A2B".to_string(),
            reason: "refunded".to_string(),
            voided_at: Utc::now(),
        },
        ScanAction::ScanRejected {
            ticket_code: "TKT-1A2B".to_string(),
            original_scan_at: Utc::now(),
        },
    ];

    for event in events {
        assert!(!event.is_command(), "Should not be command: {event:?}");
        assert!(event.is_event(), "Expected event: {event:?}");
    }
}

#[test]
fn test_event_types_unique() {
    let events = vec![
        (
            ScanAction::TicketScanned {
                ticket_code: "TKT-1A2B".to_string(),
                scanned_at: Utc::now(),
            },
            "TicketScanned.v1",
        ),
        (
            ScanAction::TicketVoided {
                ticket_code: "TKT-1A2B".to_string(),
                reason: "refunded".to_string(),
                voided_at: Utc::now(),
            },
            "TicketVoided.v1",
        ),
        (
            ScanAction::ScanRejected {
                ticket_code: "TKT-1A2B".to_string(),
                original_scan_at: Utc::now(),
            },
            "ScanRejected.v1",
        ),
    ];

    for (event, expected_type) in events {
        assert_eq!(event.event_type(), expected_type);
    }
}
