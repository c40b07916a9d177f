use blocking_httpd::{Handled, Handler, Request, Response, Server, StatusCode};
use std::str::from_utf8;

struct MyHandler;

impl Handler for MyHandler {
    fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
        let result = format!(
            r#"{{"url": {:?}, "body": {:?}}}"#,
            from_utf8(req.url().path()).unwrap_or(""),
            from_utf8(req.body().unwrap_or(&[])).unwrap_or(""),
        );

        resp.status(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body(result)
    }
}

fn main() {
    Server::builder()
        .bind("127.0.0.1", 8080)
        .handler(MyHandler)
        .build()
        .launch();
}
