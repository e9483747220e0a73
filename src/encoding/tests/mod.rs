mod tests_checksum;
