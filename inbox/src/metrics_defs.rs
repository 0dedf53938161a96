//! Metrics definitions for the inbox service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SIGNUPS: MetricDef = MetricDef {
    name: "signup.completed",
    metric_type: MetricType::Counter,
    description: "Sign-ups that stored an account and sent a code. Tagged with kind (new, refreshed).",
};

pub const VERIFICATIONS: MetricDef = MetricDef {
    name: "verification.attempts",
    metric_type: MetricType::Counter,
    description: "Verification code submissions. Tagged with outcome.",
};

pub const SIGNINS: MetricDef = MetricDef {
    name: "signin.attempts",
    metric_type: MetricType::Counter,
    description: "Sign-in attempts. Tagged with outcome.",
};

pub const MESSAGES_SENT: MetricDef = MetricDef {
    name: "messages.sent",
    metric_type: MetricType::Counter,
    description: "Anonymous messages stored in a recipient's inbox",
};

pub const MESSAGES_REJECTED: MetricDef = MetricDef {
    name: "messages.rejected",
    metric_type: MetricType::Counter,
    description: "Anonymous messages refused. Tagged with reason.",
};

pub const MESSAGES_DELETED: MetricDef = MetricDef {
    name: "messages.deleted",
    metric_type: MetricType::Counter,
    description: "Messages deleted by their recipient",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with route, status.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SIGNUPS,
    VERIFICATIONS,
    SIGNINS,
    MESSAGES_SENT,
    MESSAGES_REJECTED,
    MESSAGES_DELETED,
    REQUEST_DURATION,
];
