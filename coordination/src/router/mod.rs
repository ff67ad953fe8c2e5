//! Query Router Module
//!
//! Classifies incoming queries so the model registry can choose which
//! analyzers to run and how to weigh them.
//!
//! # Selection Rules
//!
//! ```text
//! Flag                 | Models added                       | Strategy / timeout
//! ---------------------|------------------------------------|---------------------------
//! (always)             | gemini                             | adaptive, 30s
//! sentiment            | finbert, cryptobert, newsRoberta   | -
//! technical            | technicalAnalyzer, finbert         | -
//! educational          | finbert                            | confidence
//! urgency = high       | keep first 2                       | fastResponse, 15s
//! complexity = high    | -                                  | highAccuracy, 60s
//! ```

pub mod query_classifier;

pub use query_classifier::{Complexity, QueryAnalysis, QueryClassifier, Urgency};
