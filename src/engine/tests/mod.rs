mod helpers;
mod tests_column_families;
