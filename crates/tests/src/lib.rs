pub mod fixtures;

#[cfg(test)]
mod camera_tests;
#[cfg(test)]
mod status_tests;
#[cfg(test)]
mod stream_tests;
#[cfg(test)]
mod operator_tests;
#[cfg(test)]
mod mongo_tests;
