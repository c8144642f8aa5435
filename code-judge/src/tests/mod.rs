mod languages;
mod utils;
