mod helpers;

mod crypto_tests;
mod recovery_tests;
