// Services: model client, file tools and the conversation store.
pub mod history;
pub mod llm;
pub mod tools;
