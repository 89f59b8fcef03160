pub mod local_file_adapter;
