pub mod fifo_buffer;
pub mod sequence_buffer;
