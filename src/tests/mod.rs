//! Cross-module tests run against the scripted CLI

mod fund_retry_tests;
