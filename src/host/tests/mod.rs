mod control_test;
mod dispatcher_test;
