//! Agent-canvas-rs is the engine behind a drag-and-drop multi-agent workflow
//! canvas: it owns the workflow graph and its connection rules, the run
//! animation state machine, and the conversation session protocol spoken
//! against an orchestration backend. Rendering, styling and the log panel
//! are host concerns; the host injects a [`logging::CanvasLogger`] and reads
//! state back through the [`canvas::AgentCanvas`] accessors.
pub mod adaptive_card;
pub mod canvas;
pub mod catalog;
pub mod conversation;
pub mod graph_workflow;
pub mod logging;
pub mod orchestration_api;
pub mod run_controller;
pub mod workflow_config;
