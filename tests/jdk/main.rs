mod concurrent_associate;
mod concurrent_contains;
mod map_check;
