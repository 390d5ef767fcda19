pub mod make_token;
