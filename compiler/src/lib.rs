// ttasched — instruction scheduler for transport-triggered processors
//
// Library root. Front-end (lexer, parser, ast), machine model, dependence
// graphs, scheduling strategies, delay-slot filling, the backend plugin
// cache, and the diagnostic emitters.

pub mod alias;
pub mod ast;
pub mod bottom_up;
pub mod bubblefish;
pub mod ddg;
pub mod ddg_builder;
pub mod delay_slot;
pub mod diag;
pub mod dot;
pub mod error;
pub mod id;
pub mod lexer;
pub mod machine;
pub mod parser;
pub mod pass;
pub mod patterns;
pub mod pipeline;
pub mod plugin_cache;
pub mod pressure;
pub mod priority;
pub mod resource;
pub mod schedule;
pub mod strategy;
pub mod timing;
pub mod top_down;
