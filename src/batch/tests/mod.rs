mod tests_basic;
mod tests_save_points;
mod tests_two_phase;
