mod tests_block;
mod tests_filter;
