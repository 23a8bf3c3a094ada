pub mod tempo;
