use blocking_httpd::{Handled, Handler, Request, Response, Server, StatusCode};

struct HelloWorld;

impl Handler<()> for HelloWorld {
    fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body("Hello, world!")
    }
}

fn main() {
    Server::builder()
        .bind("127.0.0.1", 8080)
        .handler(HelloWorld)
        .build()
        .launch();
}
