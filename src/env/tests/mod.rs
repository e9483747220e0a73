mod tests_filenames;
