
mod test_reset_timer;
mod test_window_limiter;
